//! Pre-commit guard tools.

use crate::errors::{ErrorKind, ToolError};
use crate::params::{InstallGuardParams, UninstallGuardParams};
use std::path::Path;
use std::sync::Arc;
use waggle_core::Ctx;
use waggle_core::model::ModelManager;
use waggle_core::model::precommit_guard::PrecommitGuardBmc;

pub async fn install_precommit_guard_impl(
    _ctx: &Ctx,
    _mm: &Arc<ModelManager>,
    params: InstallGuardParams,
) -> Result<serde_json::Value, ToolError> {
    let workspace = Path::new(&params.workspace_path);
    if !workspace.is_absolute() {
        return Err(ToolError::new(
            ErrorKind::InvalidArgument,
            "workspace_path must be an absolute directory path",
        ));
    }
    let hook_path = PrecommitGuardBmc::install(workspace, &params.project_key)
        .map_err(ToolError::from)?;
    Ok(serde_json::json!({
        "installed": true,
        "hook_path": hook_path.display().to_string(),
    }))
}

pub async fn uninstall_precommit_guard_impl(
    _ctx: &Ctx,
    _mm: &Arc<ModelManager>,
    params: UninstallGuardParams,
) -> Result<serde_json::Value, ToolError> {
    let removed = PrecommitGuardBmc::uninstall(Path::new(&params.workspace_path))
        .map_err(ToolError::from)?;
    Ok(serde_json::json!({ "removed": removed }))
}
