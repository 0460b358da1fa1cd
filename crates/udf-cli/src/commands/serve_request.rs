//! udf serve-request command - run one JSON request against the store.
//!
//! The response body (or an error body) is always printed as JSON on
//! stdout, whatever `--format` says, so the command can sit behind a
//! request queue.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use udf_recon::{
    ErrorResponse, ReconConfig, ReconContext, ReconRequest, ReconResult, Reconstructor,
    SmoothRequest,
};

use crate::{Cli, output};

fn read_body(request: &Path) -> Result<String> {
    if request == Path::new("-") {
        let mut body = String::new();
        std::io::stdin()
            .read_to_string(&mut body)
            .context("Failed to read request from stdin")?;
        return Ok(body);
    }
    std::fs::read_to_string(request)
        .with_context(|| format!("Failed to read request from {:?}", request))
}

pub fn run(
    request: &Path,
    smooth: bool,
    storage_root: Option<PathBuf>,
    mut config: ReconConfig,
    cli: &Cli,
) -> Result<()> {
    let body = read_body(request)?;
    if let Some(root) = storage_root {
        config.storage_root = root;
    }

    debug!(
        smooth = smooth,
        storage_root = ?config.storage_root,
        bytes = body.len(),
        "Serving request"
    );
    let reconstructor = Reconstructor::new(Arc::new(ReconContext::from_config(config)));
    let response: ReconResult<_> = if smooth {
        SmoothRequest::from_json(&body).and_then(|r| reconstructor.smooth(&r))
    } else {
        ReconRequest::from_json(&body).and_then(|r| reconstructor.handle(&r))
    };

    match response {
        Ok(response) => {
            output::print(&response, cli.format, cli.quiet);
            Ok(())
        }
        Err(e) => {
            warn!(code = %e.code(), category = %e.category(), "Request failed");
            output::print(&ErrorResponse::from(&e), cli.format, cli.quiet);
            Err(e.into())
        }
    }
}
