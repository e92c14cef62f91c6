//! Deciding which bound parameters get encrypted.
use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use proxyproto::value::Value;
use regex::Regex;
use tracing::trace;

use crate::cipher::FieldCipher;
use crate::errors::Result;

/// Position (1-based) an UPDATE passes through unencrypted.
///
/// Assumes the second parameter is the plain identifier the statement filters
/// on. Statements written any other way get that parameter stored or matched
/// in plaintext.
pub const UPDATE_PLAIN_POSITION: u32 = 2;

/// Coarse shape of a statement, derived from its leading keyword and a couple
/// of lexical checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementShape {
    Insert,
    Update,
    Delete,
    /// SELECT with a WHERE clause containing `=`.
    SelectEquality,
    /// Any other SELECT.
    SelectScan,
    Other,
}

static WHERE_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bWHERE\b").unwrap());

impl StatementShape {
    pub fn classify(sql: &str) -> Self {
        let sql = sql.trim().to_uppercase();
        if sql.starts_with("INSERT") {
            StatementShape::Insert
        } else if sql.starts_with("UPDATE") {
            StatementShape::Update
        } else if sql.starts_with("DELETE") {
            StatementShape::Delete
        } else if sql.starts_with("SELECT") {
            match WHERE_KEYWORD.find(&sql) {
                Some(m) if sql[m.start()..].contains('=') => StatementShape::SelectEquality,
                _ => StatementShape::SelectScan,
            }
        } else {
            StatementShape::Other
        }
    }
}

/// How the statement is being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Query,
    Update,
}

/// The rule applied to a statement's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamPolicy {
    /// Encrypt every non-null parameter up to the declared count.
    EncryptAll,
    /// Like `EncryptAll`, but the parameter at the given position is bound as
    /// is.
    EncryptAllExcept(u32),
    /// Encrypt every non-null parameter.
    ForceEncryptAll,
    /// Encrypt string parameters only.
    EncryptStrings,
    PassThrough,
}

impl ParamPolicy {
    /// Pick the policy for a statement.
    ///
    /// Data modifying statements are only rewritten when executed as updates.
    /// Equality lookups get their string parameters encrypted however they're
    /// executed.
    pub fn for_statement(shape: StatementShape, mode: ExecMode) -> Self {
        match (shape, mode) {
            (StatementShape::Insert, ExecMode::Update) => ParamPolicy::EncryptAll,
            (StatementShape::Update, ExecMode::Update) => {
                ParamPolicy::EncryptAllExcept(UPDATE_PLAIN_POSITION)
            }
            (StatementShape::Delete, ExecMode::Update) => ParamPolicy::ForceEncryptAll,
            (StatementShape::SelectEquality, _) => ParamPolicy::EncryptStrings,
            _ => ParamPolicy::PassThrough,
        }
    }

    pub fn for_sql(sql: &str, mode: ExecMode) -> Self {
        Self::for_statement(StatementShape::classify(sql), mode)
    }

    /// Apply the policy, returning the values to bind keyed by position.
    ///
    /// `declared` is the number of placeholders the prepared statement
    /// reports. Policies bounded by it drop parameters past that count.
    pub fn apply(
        &self,
        cipher: &FieldCipher,
        params: &BTreeMap<u32, Value>,
        declared: usize,
    ) -> Result<BTreeMap<u32, Value>> {
        let mut out = BTreeMap::new();
        for (&pos, value) in params {
            let bounded = matches!(
                self,
                ParamPolicy::EncryptAll | ParamPolicy::EncryptAllExcept(_)
            );
            if bounded && pos as usize > declared {
                trace!(pos, declared, "skipping parameter past declared count");
                continue;
            }

            let encrypt = match self {
                ParamPolicy::EncryptAll | ParamPolicy::ForceEncryptAll => !value.is_null(),
                ParamPolicy::EncryptAllExcept(skip) => !value.is_null() && pos != *skip,
                ParamPolicy::EncryptStrings => matches!(value, Value::String(_)),
                ParamPolicy::PassThrough => false,
            };

            let bound = if encrypt {
                trace!(pos, "encrypting parameter");
                cipher.encrypt_value(value)?
            } else {
                value.clone()
            };
            out.insert(pos, bound);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(vals: impl IntoIterator<Item = Value>) -> BTreeMap<u32, Value> {
        vals.into_iter()
            .enumerate()
            .map(|(idx, v)| (idx as u32 + 1, v))
            .collect()
    }

    fn enc(cipher: &FieldCipher, s: &str) -> Value {
        Value::String(cipher.encrypt(s))
    }

    #[test]
    fn classify_shapes() {
        let cases = [
            ("insert into t values (?)", StatementShape::Insert),
            ("  Update t set a = ? where id = ?", StatementShape::Update),
            ("DELETE FROM t WHERE a = ?", StatementShape::Delete),
            ("select a from t where a = ?", StatementShape::SelectEquality),
            ("select a from t where a > ?", StatementShape::SelectScan),
            ("select a = 1 from t", StatementShape::SelectScan),
            ("select * from t", StatementShape::SelectScan),
            ("SELECT nowhere_flag = ? FROM t", StatementShape::SelectScan),
            ("select a from somewhere_t where_x = 1", StatementShape::SelectScan),
            ("select a from t\nwhere\ta = ?", StatementShape::SelectEquality),
            ("create table t (a text)", StatementShape::Other),
        ];
        for (sql, expected) in cases {
            assert_eq!(expected, StatementShape::classify(sql), "{sql}");
        }
    }

    #[test]
    fn insert_encrypts_up_to_declared() {
        let cipher = FieldCipher::default();
        let input = params([Value::from("a"), Value::Null, Value::Int(3), Value::from("x")]);
        let policy = ParamPolicy::for_sql("INSERT INTO t VALUES (?, ?, ?)", ExecMode::Update);
        assert_eq!(ParamPolicy::EncryptAll, policy);

        let out = policy.apply(&cipher, &input, 3).unwrap();
        let expected = params([enc(&cipher, "a"), Value::Null, enc(&cipher, "3")]);
        assert_eq!(expected, out);
    }

    #[test]
    fn update_passes_second_position_through() {
        let cipher = FieldCipher::default();
        let input = params([Value::from("a"), Value::from("b"), Value::from("c")]);
        let policy = ParamPolicy::for_sql("update t set x = ? where id = ? and y = ?", ExecMode::Update);

        let out = policy.apply(&cipher, &input, 3).unwrap();
        let expected = params([enc(&cipher, "a"), Value::from("b"), enc(&cipher, "c")]);
        assert_eq!(expected, out);
    }

    #[test]
    fn delete_force_encrypts_everything() {
        let cipher = FieldCipher::default();
        let already = cipher.encrypt("z");
        let input = params([Value::from(already.as_str()), Value::Int(7), Value::Null]);
        let policy = ParamPolicy::for_sql("delete from t where a = ? or b = ? or c = ?", ExecMode::Update);

        let out = policy.apply(&cipher, &input, 3).unwrap();
        let expected = params([enc(&cipher, &already), enc(&cipher, "7"), Value::Null]);
        assert_eq!(expected, out);
    }

    #[test]
    fn equality_select_encrypts_strings_only() {
        let cipher = FieldCipher::default();
        let input = params([Value::from("hello"), Value::Int(5)]);
        let policy = ParamPolicy::for_sql("SELECT col FROM t WHERE col = ? AND n = ?", ExecMode::Query);
        assert_eq!(ParamPolicy::EncryptStrings, policy);

        let out = policy.apply(&cipher, &input, 2).unwrap();
        let expected = params([enc(&cipher, "hello"), Value::Int(5)]);
        assert_eq!(expected, out);
    }

    #[test]
    fn scans_and_queries_pass_through() {
        let cipher = FieldCipher::default();
        let input = params([Value::from("hello")]);

        for (sql, mode) in [
            ("select * from t where a > ?", ExecMode::Query),
            ("insert into t values (?)", ExecMode::Query),
            ("pragma table_info(?)", ExecMode::Update),
        ] {
            let policy = ParamPolicy::for_sql(sql, mode);
            assert_eq!(ParamPolicy::PassThrough, policy, "{sql}");
            assert_eq!(input, policy.apply(&cipher, &input, 1).unwrap());
        }
    }
}
