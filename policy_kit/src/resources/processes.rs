//! `processes`: process table of a Unix target.
//!
//! The optional parameter is a regular expression matched against the full
//! command line; without one every process is listed. Rows come from one
//! `ps` call per instance and are then filtered in memory.

use std::sync::Arc;

use regex::Regex;

use super::{param, ConstructError, ConstructResult, Resource};
use crate::error::AssertionError;
use crate::filter_table::{CachedTable, DynTable, FilterTable};
use crate::table_row;
use crate::transport::Connection;
use crate::value::Value;

table_row! {
    /// One line of `ps` output
    pub struct ProcessRow {
        pid: i64,
        ppid: i64,
        user: String,
        stat: String,
        tty: String,
        command: String,
    }
}

pub struct ProcessesResource {
    conn: Arc<Connection>,
    grep: Option<Regex>,
    label: String,
    rows: CachedTable<ProcessRow, AssertionError>,
}

pub fn construct(params: &Value, conn: &Arc<Connection>) -> ConstructResult {
    let pattern = param(params, "name");
    let grep = match &pattern {
        Some(p) => Some(
            Regex::new(p).map_err(|e| ConstructError::Failed(format!("invalid process pattern: {}", e)))?,
        ),
        None => None,
    };
    Ok(Box::new(ProcessesResource {
        conn: Arc::clone(conn),
        grep,
        label: pattern.unwrap_or_else(|| "all".to_string()),
        rows: CachedTable::new(),
    }))
}

impl ProcessesResource {
    fn snapshot(&self) -> Result<&FilterTable<ProcessRow>, AssertionError> {
        self.rows.get_or_fetch(|| {
            let command = if self.conn.os().is_linux() {
                "ps axo pid,ppid,user:32,stat,tty,command"
            } else {
                "ps axo pid,ppid,user,stat,tty,command"
            };
            let output = self.conn.run(command)?;
            if !output.success() {
                return Err(AssertionError::Accessor {
                    property: "processes".to_string(),
                    reason: format!("ps exited with {}: {}", output.exit_status, output.stderr.trim()),
                });
            }
            Ok(parse_ps(&output.stdout))
        })
    }

    fn selected(&self) -> Result<FilterTable<ProcessRow>, AssertionError> {
        let table = self.snapshot()?;
        Ok(match &self.grep {
            Some(re) => table.filter(|row| re.is_match(&row.row().command)),
            None => table.clone(),
        })
    }
}

/// Parse `ps` output, skipping the header line
pub(crate) fn parse_ps(stdout: &str) -> Vec<ProcessRow> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse().ok()?;
            let ppid = parts.next()?.parse().ok()?;
            let user = parts.next()?.to_string();
            let stat = parts.next()?.to_string();
            let tty = parts.next()?.to_string();
            let command = parts.collect::<Vec<_>>().join(" ");
            Some(ProcessRow {
                pid,
                ppid,
                user,
                stat,
                tty,
                command,
            })
        })
        .collect()
}

impl Resource for ProcessesResource {
    fn describe(&self) -> String {
        format!("Processes {}", self.label)
    }

    fn exists(&self) -> Result<bool, AssertionError> {
        Ok(self.selected()?.exists())
    }

    fn get(&self, property: &str) -> Result<Value, AssertionError> {
        let table = self.selected()?;
        Ok(match property {
            "entries" => Value::List(table.entries()),
            "count" => Value::from(table.len() as i64),
            // Unknown columns are nil like any other unknown property.
            field => table.column(field).map(Value::List).unwrap_or(Value::Null),
        })
    }

    fn table(&self) -> Option<Result<Box<dyn DynTable>, AssertionError>> {
        Some(self.selected().map(|t| Box::new(t) as Box<dyn DynTable>))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::{PlatformInfo, TargetDescriptor};

    const PS: &str = "\
    PID    PPID USER                             STAT TT       COMMAND
      1       0 root                             Ss   ?        /sbin/init splash
    812       1 root                             Ss   ?        sshd: /usr/sbin/sshd -D [listener]
   1402       1 www-data                         S    ?        nginx: worker process
";

    fn resource(params: Value, mock: &MockTransport) -> Box<dyn Resource> {
        let conn = Arc::new(Connection::new(
            TargetDescriptor::parse("mock://").unwrap(),
            Box::new(mock.clone()),
        ));
        construct(&params, &conn).ok().unwrap()
    }

    fn mock() -> MockTransport {
        MockTransport::new()
            .with_platform(PlatformInfo::new("ubuntu", "debian"))
            .with_command("ps axo pid,ppid,user:32,stat,tty,command", PS, 0)
    }

    #[test]
    fn test_parse_ps_keeps_full_command() {
        let rows = parse_ps(PS);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].command, "sshd: /usr/sbin/sshd -D [listener]");
        assert_eq!(rows[2].user, "www-data");
    }

    #[test]
    fn test_grep_parameter_filters_rows() {
        let procs = resource(Value::from("sshd"), &mock());
        assert!(procs.exists().unwrap());
        assert_eq!(procs.get("pid").unwrap(), Value::List(vec![Value::Integer(812)]));
        assert_eq!(procs.get("count").unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_ps_runs_once_per_instance() {
        let mock = mock();
        let procs = resource(Value::Null, &mock);
        procs.get("user").unwrap();
        procs.get("command").unwrap();
        procs.table().unwrap().unwrap();
        let ps_calls = mock
            .calls()
            .into_iter()
            .filter(|c| matches!(c, crate::transport::mock::MockCall::Command(cmd) if cmd.starts_with("ps ")))
            .count();
        assert_eq!(ps_calls, 1);
    }

    #[test]
    fn test_unknown_column_is_nil() {
        let procs = resource(Value::Null, &mock());
        assert_eq!(procs.get("memory").unwrap(), Value::Null);
    }
}
