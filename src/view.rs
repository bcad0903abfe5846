//! View name resolution.
//!
//! A view stores the names of the tables and views its select reads. Reading
//! it means expanding those names against the current InfoSchema until only
//! base tables remain. Names are re-resolved every time, so a rename can
//! turn a valid definition into a cycle; the walk keeps the chain of views
//! being expanded and fails when one reappears.

use std::sync::Arc;

use crate::errors::{PlannerError, Result};
use crate::infoschema::{InfoSchema, TableHandle};

/// Resolve `schema.view` to the base tables it ultimately reads, in
/// reference order and without duplicates.
pub fn resolve_view(is: &InfoSchema, schema: &str, view: &str) -> Result<Vec<Arc<TableHandle>>> {
    let root = (schema.to_lowercase(), view.to_lowercase());
    let mut walk = ViewWalk {
        is,
        outermost: (schema.to_string(), view.to_string()),
        path: Vec::new(),
        bases: Vec::new(),
    };
    walk.visit(&root.0, &root.1)?;
    Ok(walk.bases)
}

struct ViewWalk<'a> {
    is: &'a InfoSchema,
    outermost: (String, String),
    /// Views currently being expanded, outermost first.
    path: Vec<(String, String)>,
    bases: Vec<Arc<TableHandle>>,
}

impl ViewWalk<'_> {
    fn visit(&mut self, schema: &str, name: &str) -> Result<()> {
        let Ok(handle) = self.is.table_by_name(schema, name) else {
            return Err(PlannerError::ViewInvalid {
                schema: self.outermost.0.clone(),
                view: self.outermost.1.clone(),
            }
            .into());
        };
        let Some(view) = handle.meta.view() else {
            if !self.bases.iter().any(|b| b.meta.id == handle.meta.id) {
                self.bases.push(handle);
            }
            return Ok(());
        };

        let key = (schema.to_lowercase(), name.to_lowercase());
        if self.path.contains(&key) {
            let db = self
                .is
                .schema_by_name(schema)
                .map(|db| db.name.o.clone())
                .unwrap_or_else(|| schema.to_string());
            return Err(PlannerError::ViewRecursive {
                schema: db,
                view: handle.meta.name.o.clone(),
            }
            .into());
        }
        self.path.push(key);
        for reference in &view.references {
            self.visit(&reference.schema.l, &reference.name.l)?;
        }
        self.path.pop();
        Ok(())
    }
}
