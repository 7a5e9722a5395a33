use super::*;

pub(crate) fn validate_config(config: &SessionConfig) -> Result<()> {
    if config.primary.trim().is_empty() {
        return Err(RelmapError::Validation(
            "primary key column must not be empty".into(),
        ));
    }
    if config.primary.contains(['"', ';']) {
        return Err(RelmapError::Validation(format!(
            "primary key column '{}' contains reserved characters",
            config.primary
        )));
    }
    if config.charset.trim().is_empty() {
        return Err(RelmapError::Validation("charset must not be empty".into()));
    }
    if config.default_port == 0 {
        return Err(RelmapError::Validation("default_port must be > 0".into()));
    }
    Ok(())
}

/// Splits a `table-key` pointer at its last dash.
pub(crate) fn parse_pointer(pointer: &str) -> Option<(&str, i64)> {
    let (table, key) = pointer.rsplit_once('-')?;
    if table.is_empty() {
        return None;
    }
    key.parse::<i64>().ok().map(|key| (table, key))
}

/// Every row of a bulk insert must supply a value for every field.
pub(crate) fn check_bulk_rows(fields: &[&str], rows: &[Vec<Value>]) -> Result<()> {
    if fields.is_empty() {
        return Err(RelmapError::Validation("bulk insert needs fields".into()));
    }
    for (index, row) in rows.iter().enumerate() {
        if row.len() != fields.len() {
            return Err(RelmapError::Validation(format!(
                "row {index} has {} values for {} fields; every field must be included",
                row.len(),
                fields.len()
            )));
        }
    }
    Ok(())
}
