use serde::{Deserialize, Serialize};

/// The one signal an external health monitor consumes from a banker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorIndicator {
    pub service_name: String,
    pub status: bool,
    pub message: String,
}
