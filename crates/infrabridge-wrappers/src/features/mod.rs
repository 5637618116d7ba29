pub mod heat_compute;
pub mod mock_compute;
pub mod mock_network;
pub mod mock_wan;

use infrabridge_core::payload::{DeployResponse, RemoveBranchOutcome};
use infrabridge_core::StatusUpdate;

pub(crate) fn deploy_update(sid: &str, response: &DeployResponse) -> StatusUpdate {
    match serde_json::to_string(response) {
        Ok(body) => StatusUpdate::success(sid, body),
        Err(e) => StatusUpdate::error(sid, format!("unable to serialize the response: {e}")),
    }
}

pub(crate) fn removal_update(sid: &str, wrapper_uuid: &str) -> StatusUpdate {
    let outcome = RemoveBranchOutcome {
        status: "SUCCESS".to_string(),
        wrapper_uuid: wrapper_uuid.to_string(),
    };
    match serde_json::to_string(&outcome) {
        Ok(body) => StatusUpdate::success(sid, body),
        Err(e) => StatusUpdate::error(sid, format!("unable to serialize the response: {e}")),
    }
}
