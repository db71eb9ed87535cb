//! `os`: platform facts of the target.

use std::sync::Arc;

use super::{ConstructResult, Resource};
use crate::error::AssertionError;
use crate::transport::{Connection, PlatformInfo};
use crate::value::Value;

pub struct OsResource {
    platform: PlatformInfo,
}

pub fn construct(_params: &Value, conn: &Arc<Connection>) -> ConstructResult {
    Ok(Box::new(OsResource {
        platform: conn.os().clone(),
    }))
}

impl Resource for OsResource {
    fn describe(&self) -> String {
        "Operating System Detection".to_string()
    }

    fn exists(&self) -> Result<bool, AssertionError> {
        Ok(!self.platform.is_unknown())
    }

    fn get(&self, property: &str) -> Result<Value, AssertionError> {
        let p = &self.platform;
        Ok(match property {
            "name" => Value::from(p.name.as_str()),
            "family" => Value::from(p.family.as_str()),
            "release" => Value::from(p.release.clone()),
            "arch" => Value::from(p.arch.clone()),
            "families" => Value::from(p.families()),
            "linux" => Value::from(p.is_linux()),
            "unix" => Value::from(p.is_unix()),
            "windows" => Value::from(p.is_windows()),
            // `redhat`, `debian`, `darwin`, ...
            other => match other.strip_suffix('?').unwrap_or(other) {
                family if known_family(family) => Value::from(p.is_family(family)),
                _ => Value::Null,
            },
        })
    }
}

fn known_family(name: &str) -> bool {
    matches!(
        name,
        "redhat" | "debian" | "suse" | "alpine" | "arch" | "gentoo" | "darwin" | "bsd" | "solaris"
            | "aix" | "hpux"
    )
}
