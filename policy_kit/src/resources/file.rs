//! `file`: metadata and content of one path.
//!
//! | Property | Value |
//! |----------|-------|
//! | `exists` | path exists |
//! | `type` | `file`, `directory`, `symlink` or `other` |
//! | `mode` | 4-digit octal string, e.g. `"0644"` |
//! | `owner`, `group` | names as reported by the target |
//! | `uid`, `gid`, `size`, `mtime` | integers |
//! | `content` | file text, `nil` when missing or unreadable |
//!
//! Stat and content are each fetched at most once per instance.

use std::sync::{Arc, OnceLock};

use super::{required_param, ConstructResult, Resource};
use crate::error::{AssertionError, ConnectionError};
use crate::transport::{Connection, FileKind, FileStat};
use crate::value::Value;

pub struct FileResource {
    conn: Arc<Connection>,
    path: String,
    stat: OnceLock<Result<Option<FileStat>, ConnectionError>>,
    content: OnceLock<Result<Option<String>, ConnectionError>>,
}

pub fn construct(params: &Value, conn: &Arc<Connection>) -> ConstructResult {
    let path = required_param("file", params, "path")?;
    Ok(Box::new(FileResource {
        conn: Arc::clone(conn),
        path,
        stat: OnceLock::new(),
        content: OnceLock::new(),
    }))
}

impl FileResource {
    fn stat(&self) -> Result<Option<&FileStat>, AssertionError> {
        self.stat
            .get_or_init(|| self.conn.transport().stat(&self.path))
            .as_ref()
            .map(Option::as_ref)
            .map_err(|e| AssertionError::Connection(e.clone()))
    }

    fn content(&self) -> Result<Option<&str>, AssertionError> {
        self.content
            .get_or_init(|| self.conn.transport().read_file(&self.path))
            .as_ref()
            .map(Option::as_deref)
            .map_err(|e| AssertionError::Connection(e.clone()))
    }
}

impl Resource for FileResource {
    fn describe(&self) -> String {
        format!("File {}", self.path)
    }

    fn exists(&self) -> Result<bool, AssertionError> {
        Ok(self.stat()?.is_some())
    }

    fn get(&self, property: &str) -> Result<Value, AssertionError> {
        if property == "content" {
            return Ok(Value::from(self.content()?.map(str::to_string)));
        }
        if property == "exists" {
            return Ok(Value::from(self.exists()?));
        }

        let Some(stat) = self.stat()? else {
            return Ok(Value::Null);
        };
        Ok(match property {
            "type" => Value::from(match stat.kind {
                FileKind::File => "file",
                FileKind::Directory => "directory",
                FileKind::Symlink => "symlink",
                FileKind::Other => "other",
            }),
            "mode" => Value::from(format!("{:04o}", stat.mode)),
            "owner" => Value::from(stat.owner.clone()),
            "group" => Value::from(stat.group.clone()),
            "uid" => Value::from(stat.uid),
            "gid" => Value::from(stat.gid),
            "size" => Value::Integer(i64::try_from(stat.size).unwrap_or(i64::MAX)),
            "mtime" => Value::from(stat.mtime),
            _ => Value::Null,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockCall, MockTransport};
    use crate::transport::TargetDescriptor;

    fn resource(mock: &MockTransport, path: &str) -> Box<dyn Resource> {
        let conn = Arc::new(Connection::new(
            TargetDescriptor::parse("mock://").unwrap(),
            Box::new(mock.clone()),
        ));
        construct(&Value::from(path), &conn).ok().unwrap()
    }

    #[test]
    fn test_metadata_properties() {
        let mut stat = FileStat::file(0o600, 3);
        stat.owner = Some("root".into());
        stat.uid = Some(0);
        let mock = MockTransport::new().with_file_stat("/etc/shadow", Some("x:y"), stat);
        let file = resource(&mock, "/etc/shadow");

        assert!(file.exists().unwrap());
        assert_eq!(file.get("mode").unwrap(), Value::from("0600"));
        assert_eq!(file.get("owner").unwrap(), Value::from("root"));
        assert_eq!(file.get("uid").unwrap(), Value::Integer(0));
        assert_eq!(file.get("type").unwrap(), Value::from("file"));
        assert_eq!(file.get("content").unwrap(), Value::from("x:y"));
        assert_eq!(file.get("sha1").unwrap(), Value::Null);
    }

    #[test]
    fn test_missing_file_is_negative_not_error() {
        let mock = MockTransport::new();
        let file = resource(&mock, "/nope");
        assert!(!file.exists().unwrap());
        assert_eq!(file.get("mode").unwrap(), Value::Null);
        assert_eq!(file.get("content").unwrap(), Value::Null);
    }

    #[test]
    fn test_stat_cached_per_instance() {
        let mock = MockTransport::new().with_directory("/var/log");
        let file = resource(&mock, "/var/log");
        file.get("mode").unwrap();
        file.get("owner").unwrap();
        file.exists().unwrap();
        assert_eq!(mock.calls(), vec![MockCall::Stat("/var/log".into())]);
    }
}
