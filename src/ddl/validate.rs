//! Checks run on statements before a job is queued.

use crate::errors::{Result, SchemaError, ValidationError};
use crate::model::{
    ColumnInfo, ColumnType, DETERMINISTIC_FUNCTIONS, DefaultValue, Expr, FieldType, SequenceInfo, TableInfo,
};

pub const MAX_IDENTIFIER_LEN: usize = 64;

pub fn check_identifier(name: &str) -> Result<()> {
    if name.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLongIdent(name.to_string()).into());
    }
    Ok(())
}

/// A default must be storable in the column: `CURRENT_TIMESTAMP(n)` only on
/// DATETIME/TIMESTAMP columns of precision `n`, NULL only on nullable columns.
pub fn check_default_value(col: &ColumnInfo) -> Result<()> {
    let invalid = || ValidationError::InvalidDefault(col.name.o.clone()).into();
    match &col.default_value {
        None => Ok(()),
        Some(_) if col.is_generated() || col.auto_increment => Err(invalid()),
        Some(DefaultValue::CurrentTimestamp { fsp }) => {
            let temporal = matches!(col.field_type.tp, ColumnType::Timestamp | ColumnType::DateTime);
            if temporal && *fsp == col.field_type.fsp() {
                Ok(())
            } else {
                Err(invalid())
            }
        }
        Some(DefaultValue::Literal(value)) if value.is_null() => {
            if col.not_null {
                Err(invalid())
            } else {
                Ok(())
            }
        }
        Some(DefaultValue::Literal(value)) => col
            .field_type
            .convert(value.clone(), &col.name.o)
            .map(|_| ())
            .map_err(|_| invalid()),
    }
}

fn check_functions(expr: &Expr, name: &str) -> Result<()> {
    if expr
        .functions()
        .iter()
        .any(|f| !DETERMINISTIC_FUNCTIONS.contains(&f.as_str()))
    {
        return Err(ValidationError::GeneratedColumnFunctionIsNotAllowed(name.to_string()).into());
    }
    Ok(())
}

/// Validate every generated column of `columns`, given in ordinal order.
pub fn check_generated_columns(columns: &[ColumnInfo], allow_auto_increment: bool) -> Result<()> {
    for (i, col) in columns.iter().enumerate() {
        let Some(generated) = &col.generated else { continue };
        check_functions(&generated.expr, &col.name.o)?;
        for name in generated.expr.columns() {
            let Some(pos) = columns.iter().position(|c| c.name.l == name) else {
                return Err(ValidationError::BadField {
                    column: name,
                    clause: "generated column function".to_string(),
                }
                .into());
            };
            let referenced = &columns[pos];
            if referenced.auto_increment && !allow_auto_increment {
                return Err(ValidationError::GeneratedColumnRefAutoInc(col.name.o.clone()).into());
            }
            if referenced.is_generated() && pos >= i {
                return Err(ValidationError::GeneratedColumnNonPrior.into());
            }
        }
    }
    Ok(())
}

/// An index expression may call only deterministic functions and may not
/// read an auto-increment column.
pub fn check_expression_index(table: &TableInfo, index_name: &str, expr: &Expr) -> Result<()> {
    check_functions(expr, index_name)?;
    for name in expr.columns() {
        let col = table.find_column(&name).ok_or_else(|| SchemaError::ColumnNotExists {
            column: name.clone(),
            table: table.name.o.clone(),
        })?;
        if col.auto_increment {
            return Err(ValidationError::ExpressionIndexCanNotRefer(index_name.to_string()).into());
        }
    }
    Ok(())
}

const STRING_FUNCTIONS: &[&str] = &[
    "lower", "upper", "concat", "trim", "ltrim", "rtrim", "left", "right", "reverse",
];

/// Type of the hidden column backing an index expression.
pub fn infer_expr_type(table: &TableInfo, expr: &Expr) -> FieldType {
    match expr {
        Expr::Column(name) => table
            .find_column(name)
            .map(|c| c.field_type.clone())
            .unwrap_or_else(FieldType::bigint),
        Expr::Func { name, .. } if STRING_FUNCTIONS.contains(&name.as_str()) => {
            let mut ft = FieldType::varchar(255);
            ft.charset = table.charset.clone();
            ft.collate = table.collate.clone();
            ft
        }
        Expr::Literal(crate::model::Datum::String(_)) => FieldType::varchar(255),
        Expr::Binary { .. } | Expr::Func { .. } | Expr::Literal(_) => FieldType::bigint(),
    }
}

pub fn check_sequence(schema: &str, name: &str, seq: &SequenceInfo) -> Result<()> {
    let valid = seq.increment != 0
        && seq.min_value < seq.max_value
        && (seq.min_value..=seq.max_value).contains(&seq.start)
        && (!seq.cache || seq.cache_value > 0);
    if !valid {
        return Err(ValidationError::SequenceInvalidData {
            schema: schema.to_string(),
            name: name.to_string(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Datum, GeneratedColumn, SchemaState};

    fn col(name: &str) -> ColumnInfo {
        ColumnInfo {
            id: 0,
            name: name.into(),
            offset: 0,
            field_type: FieldType::bigint(),
            default_value: None,
            origin_default: None,
            generated: None,
            not_null: false,
            prevent_null_insert: false,
            auto_increment: false,
            primary_key: false,
            hidden: false,
            state: SchemaState::Public,
            comment: String::new(),
        }
    }

    fn gen_col(name: &str, expr: Expr) -> ColumnInfo {
        ColumnInfo {
            generated: Some(GeneratedColumn { expr, stored: false }),
            ..col(name)
        }
    }

    fn plus_one(name: &str) -> Expr {
        Expr::binary(crate::model::BinaryOp::Add, Expr::col(name), Expr::lit(1))
    }

    #[test]
    fn test_identifier_length() {
        assert!(check_identifier(&"a".repeat(64)).is_ok());
        assert_eq!(check_identifier(&"a".repeat(65)).unwrap_err().code(), 1059);
    }

    #[test]
    fn test_default_values() {
        let mut ts = col("ts");
        ts.field_type = FieldType::timestamp(3);
        ts.default_value = Some(DefaultValue::CurrentTimestamp { fsp: 3 });
        assert!(check_default_value(&ts).is_ok());
        ts.default_value = Some(DefaultValue::CurrentTimestamp { fsp: 0 });
        assert_eq!(check_default_value(&ts).unwrap_err().code(), 1067);

        let mut a = col("a");
        a.default_value = Some(DefaultValue::CurrentTimestamp { fsp: 0 });
        assert_eq!(check_default_value(&a).unwrap_err().code(), 1067);

        a.not_null = true;
        a.default_value = Some(DefaultValue::Literal(Datum::Null));
        let err = check_default_value(&a).unwrap_err();
        assert_eq!(err.to_string(), "[ddl:1067]Invalid default value for 'a'");

        a.default_value = Some(DefaultValue::Literal(Datum::from("x")));
        assert_eq!(check_default_value(&a).unwrap_err().code(), 1067);
    }

    #[test]
    fn test_generated_column_rules() {
        let mut a = col("a");
        a.auto_increment = true;
        let cols = vec![a.clone(), col("b"), gen_col("c", plus_one("a"))];
        assert_eq!(check_generated_columns(&cols, false).unwrap_err().code(), 3109);
        assert!(check_generated_columns(&cols, true).is_ok());

        let cols = vec![col("a"), gen_col("e", plus_one("z"))];
        let err = check_generated_columns(&cols, false).unwrap_err();
        assert_eq!(err.to_string(), "[ddl:1054]Unknown column 'z' in 'generated column function'");

        let cols = vec![col("a"), gen_col("c", plus_one("b")), gen_col("b", plus_one("a"))];
        assert_eq!(check_generated_columns(&cols, false).unwrap_err().code(), 3107);

        let cols = vec![col("a"), gen_col("b", Expr::func("rand", vec![]))];
        assert_eq!(check_generated_columns(&cols, false).unwrap_err().code(), 3102);
    }

    #[test]
    fn test_expression_index_rejects_auto_increment() {
        let mut t = TableInfo::new(1, "t");
        let mut a = col("a");
        a.auto_increment = true;
        t.columns = vec![a, col("b")];
        assert!(check_expression_index(&t, "idx", &plus_one("b")).is_ok());
        let err = check_expression_index(&t, "idx", &plus_one("a")).unwrap_err();
        assert_eq!(err.code(), 3758);
        assert_eq!(infer_expr_type(&t, &Expr::func("lower", vec![Expr::col("b")])).tp, ColumnType::VarChar);
    }

    #[test]
    fn test_sequence_bounds() {
        assert!(check_sequence("test", "s", &SequenceInfo::default()).is_ok());
        let bad = SequenceInfo {
            start: 0,
            ..SequenceInfo::default()
        };
        let err = check_sequence("test", "s", &bad).unwrap_err();
        assert_eq!(err.to_string(), "[ddl:4136]Sequence 'test.s' values are conflicting");
    }
}
