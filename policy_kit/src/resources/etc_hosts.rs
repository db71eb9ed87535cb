//! `etc_hosts`: static host table as a filter table.

use std::sync::Arc;

use super::{ConstructResult, Resource};
use crate::error::AssertionError;
use crate::filter_table::{CachedTable, DynTable, FilterTable};
use crate::table_row;
use crate::transport::Connection;
use crate::value::Value;

const UNIX_PATH: &str = "/etc/hosts";
const WINDOWS_PATH: &str = r"C:\Windows\System32\drivers\etc\hosts";

table_row! {
    pub struct HostsEntry {
        ip_address: String,
        primary_name: String,
        all_host_names: Vec<String>,
    }
}

pub struct EtcHostsResource {
    conn: Arc<Connection>,
    path: String,
    rows: CachedTable<HostsEntry, AssertionError>,
}

pub fn construct(_params: &Value, conn: &Arc<Connection>) -> ConstructResult {
    let path = if conn.os().is_windows() {
        WINDOWS_PATH
    } else {
        UNIX_PATH
    };
    Ok(Box::new(EtcHostsResource {
        conn: Arc::clone(conn),
        path: path.to_string(),
        rows: CachedTable::new(),
    }))
}

impl EtcHostsResource {
    fn snapshot(&self) -> Result<&FilterTable<HostsEntry>, AssertionError> {
        self.rows.get_or_fetch(|| {
            let content = self.conn.transport().read_file(&self.path)?;
            Ok(content.as_deref().map(parse_hosts).unwrap_or_default())
        })
    }
}

/// Parse hosts-file lines; comments and blank lines are ignored
pub(crate) fn parse_hosts(content: &str) -> Vec<HostsEntry> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            let ip_address = words.next()?.to_string();
            let names: Vec<String> = words.map(str::to_string).collect();
            let primary_name = names.first()?.clone();
            Some(HostsEntry {
                ip_address,
                primary_name,
                all_host_names: names,
            })
        })
        .collect()
}

impl Resource for EtcHostsResource {
    fn describe(&self) -> String {
        "Hosts File".to_string()
    }

    fn exists(&self) -> Result<bool, AssertionError> {
        Ok(self.snapshot()?.exists())
    }

    fn get(&self, property: &str) -> Result<Value, AssertionError> {
        let table = self.snapshot()?;
        Ok(match property {
            "entries" => Value::List(table.entries()),
            field => table.column(field).map(Value::List).unwrap_or(Value::Null),
        })
    }

    fn table(&self) -> Option<Result<Box<dyn DynTable>, AssertionError>> {
        Some(self.snapshot().map(|t| Box::new(t.clone()) as Box<dyn DynTable>))
    }
}
