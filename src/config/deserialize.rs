// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Validates host aliases as connection targets at load time.

use crate::types::ConnectionTarget;
use serde::Deserialize;
use std::collections::HashMap;

pub fn deserialize_hosts<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, ConnectionTarget>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: HashMap<String, String> = HashMap::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(alias, addr)| {
            ConnectionTarget::parse(&addr)
                .map(|target| (alias.clone(), target))
                .map_err(|e| serde::de::Error::custom(format!("host {alias}: {e}")))
        })
        .collect()
}
