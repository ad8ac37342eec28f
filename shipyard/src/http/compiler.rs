//! Compiler service client

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use service_models::{CompileRequest, CompileResponse};
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::http::client::HttpClient;
use crate::models::artifact::{CompiledArtifact, InterfaceSet};
use crate::services::{CompileInput, CompilerService};

const COMPILE_PATH: &str = "/compile";

/// Submits backend sources to the remote compiler
pub struct CompilerClient {
    http: HttpClient,
    timeout: Duration,
}

impl CompilerClient {
    pub fn new(http: HttpClient, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

#[async_trait]
impl CompilerService for CompilerClient {
    async fn compile(&self, input: CompileInput) -> Result<CompiledArtifact, DeployError> {
        info!(
            "Compiling {} source files (entry {}, {} packages)",
            input.files.len(),
            input.main_file,
            input.packages.len()
        );

        let request = CompileRequest {
            files: input.files,
            packages: input.packages,
            mode: input.mode,
            main_file: input.main_file,
        };

        let response: CompileResponse = self.http.post(COMPILE_PATH, &request, self.timeout).await?;
        let artifact = decode_compile_response(response, input.source_digest)?;

        debug!("Compiled module is {} bytes", artifact.size());
        Ok(artifact)
    }
}

/// Turn a compile response into an artifact or a structured failure.
///
/// A body with `success: true` and a non-empty `error` is a failure.
pub fn decode_compile_response(
    response: CompileResponse,
    source_digest: String,
) -> Result<CompiledArtifact, DeployError> {
    if let Some(error) = non_empty(response.error) {
        return Err(DeployError::CompilationError(error));
    }
    if !response.success {
        return Err(DeployError::CompilationError(
            "compiler reported failure without diagnostics".to_string(),
        ));
    }

    let encoded = non_empty(response.wasm)
        .ok_or_else(|| DeployError::ProtocolError("compile response is missing wasm".to_string()))?;
    let wasm = BASE64
        .decode(encoded.trim())
        .map_err(|e| DeployError::ProtocolError(format!("wasm is not valid base64: {}", e)))?;
    if wasm.is_empty() {
        return Err(DeployError::ProtocolError("compiled wasm is empty".to_string()));
    }

    let candid = non_empty(response.candid).ok_or_else(|| {
        DeployError::ProtocolError("compile response is missing the candid interface".to_string())
    })?;

    Ok(CompiledArtifact {
        wasm,
        interfaces: InterfaceSet {
            candid,
            typescript: non_empty(response.typescript),
            did_js: non_empty(response.did_js),
            json_schema: non_empty(response.json_schema),
        },
        source_digest,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
