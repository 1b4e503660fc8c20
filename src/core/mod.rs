// Module declarations
pub mod error;
pub mod value;
pub mod result_set;
pub mod privilege;
pub mod user;
pub mod catalog;

// Re-exports for convenience
pub use error::DatabaseError;
pub use value::Value;
pub use result_set::ResultSet;
pub use privilege::{Privilege, PrivilegeSet};
pub use user::User;
pub use catalog::{Catalog, SessionGrant};

/// Identifies a client session for the lifetime of its connection
pub type SessionId = u64;

/// Identifies a prepared statement within its session
pub type StatementId = u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Integer(42).to_string(), "42");
        assert_eq!(Value::Real(3.5).to_string(), "3.5");
        assert_eq!(Value::Text("hello".to_string()).to_string(), "hello");
        assert_eq!(Value::Blob(vec![0xde, 0xad]).to_string(), "\\xdead");
    }

    #[test]
    fn test_value_as_int() {
        assert_eq!(Value::Integer(42).as_int(), Some(42));
        assert_eq!(Value::Text("hello".to_string()).as_int(), None);
        assert_eq!(Value::Null.as_int(), None);
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_value_as_text() {
        assert_eq!(Value::Text("hello".to_string()).as_text(), Some("hello"));
        assert_eq!(Value::Integer(42).as_text(), None);
    }

    #[test]
    fn test_result_set_column_values() {
        let mut rs = ResultSet::new(vec!["id".to_string(), "v".to_string()]);
        rs.rows.push(vec![Value::Integer(1), Value::from("a")]);
        rs.rows.push(vec![Value::Integer(2), Value::from("b")]);
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.column_values("V"), vec![&Value::from("a"), &Value::from("b")]);
        assert!(rs.column_values("missing").is_empty());
    }
}
