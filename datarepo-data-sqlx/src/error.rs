use datarepo_data::DataError;

/// Extension trait for converting `sqlx::Error` into `DataError`.
///
/// Due to Rust's orphan rules, we can't implement `From<sqlx::Error> for DataError`
/// in this crate. Use `.map_err(SqlxErrorExt::into_data_error)` instead.
/// Every driver error, `RowNotFound` included, becomes [`DataError::Database`];
/// result-count errors are raised by the repository layer, not the driver.
pub trait SqlxErrorExt {
    fn into_data_error(self) -> DataError;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_data_error(self) -> DataError {
        DataError::database(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_passes_through_as_database() {
        let err = sqlx::Error::RowNotFound.into_data_error();
        assert!(matches!(err, DataError::Database(_)), "{err}");
    }

    #[test]
    fn other_errors_pass_through_as_database() {
        let err = sqlx::Error::Protocol("broken".into()).into_data_error();
        assert!(matches!(err, DataError::Database(_)));
        assert!(err.to_string().contains("broken"));
    }
}
