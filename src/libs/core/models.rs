use chrono::Utc;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of a registered user.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId {
    pub uuid: Uuid,
}

/// Identity of a stored message. Generated as UUIDv7 so ids sort in creation order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId {
    pub uuid: Uuid,
}

macro_rules! uuid_key {
    ($name:ident) => {
        impl $name {
            pub fn generate() -> Self {
                Self {
                    uuid: Uuid::now_v7(),
                }
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self { uuid }
            }
        }

        impl From<[u8; 16]> for $name {
            fn from(bytes: [u8; 16]) -> Self {
                Self {
                    uuid: Uuid::from_bytes(bytes),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.uuid)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(|uuid| Self { uuid })
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.uuid.to_string()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let uuid_str = value.as_str()?;
                Uuid::parse_str(uuid_str)
                    .map(|uuid| Self { uuid })
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

uuid_key!(UserId);
uuid_key!(MessageId);

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_sort_by_creation() {
        let first = MessageId::generate();
        let second = MessageId::generate();
        assert!(first < second);
    }

    #[test]
    fn test_user_id_parses_its_display_form() {
        let id = UserId::generate();
        let parsed: UserId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = MessageId::from([7; 16]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
