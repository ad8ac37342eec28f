//! Execution host client

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{de::DeserializeOwned, Serialize};
use service_models::{
    ChunkAck, FinalizeAck, FinalizeRequest, InstallDirectRequest, InstallFromSessionRequest,
    InstallMetadata, InstallResult, OpenSessionRequest, OpenSessionResponse, RpcResult,
    StoreAssetAck, StoreAssetRequest, UploadChunkRequest,
};

use crate::errors::DeployError;
use crate::http::client::HttpClient;
use crate::models::deployment::ModuleKind;
use crate::services::ExecutionHost;

/// Execution host reached over JSON RPC endpoints
pub struct HttpExecutionHost {
    http: HttpClient,
    timeout: Duration,
}

impl HttpExecutionHost {
    pub fn new(http: HttpClient, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    async fn call<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, DeployError> {
        let result: RpcResult<T> = self.http.post(path, body, self.timeout).await?;
        result
            .into_result()
            .map_err(|e| DeployError::InstallError(format!("{} rejected: {}", path, e)))
    }
}

#[async_trait]
impl ExecutionHost for HttpExecutionHost {
    async fn open_upload_session(
        &self,
        total_chunks: u32,
        total_bytes: u64,
        target: &str,
        kind: ModuleKind,
        env: &str,
    ) -> Result<String, DeployError> {
        let request = OpenSessionRequest {
            total_chunks,
            total_bytes,
            target: target.to_string(),
            kind: kind.as_str().to_string(),
            env: env.to_string(),
        };
        let response: OpenSessionResponse = self.call("/sessions", &request).await?;
        if response.session_id.is_empty() {
            return Err(DeployError::ProtocolError("empty upload session id".to_string()));
        }
        Ok(response.session_id)
    }

    async fn upload_chunk(&self, session_id: &str, index: u32, bytes: &[u8]) -> Result<u32, DeployError> {
        let request = UploadChunkRequest {
            session_id: session_id.to_string(),
            index,
            data: BASE64.encode(bytes),
        };
        let path = format!("/sessions/{}/chunks", session_id);
        let ack: ChunkAck = self.call(&path, &request).await?;
        Ok(ack.index)
    }

    async fn finalize_upload(&self, session_id: &str) -> Result<(), DeployError> {
        let request = FinalizeRequest {
            session_id: session_id.to_string(),
        };
        let path = format!("/sessions/{}/finalize", session_id);
        let _: FinalizeAck = self.call(&path, &request).await?;
        Ok(())
    }

    async fn install_from_session(
        &self,
        session_id: &str,
        target: &str,
        kind: ModuleKind,
        env: &str,
        metadata: &InstallMetadata,
        reinstall: bool,
    ) -> Result<InstallResult, DeployError> {
        let request = InstallFromSessionRequest {
            session_id: session_id.to_string(),
            target: target.to_string(),
            kind: kind.as_str().to_string(),
            env: env.to_string(),
            metadata: metadata.clone(),
            reinstall,
        };
        self.call("/install/session", &request).await
    }

    async fn install_direct(
        &self,
        target: &str,
        bytes: &[u8],
        kind: ModuleKind,
        metadata: &InstallMetadata,
        reinstall: bool,
    ) -> Result<InstallResult, DeployError> {
        let request = InstallDirectRequest {
            target: target.to_string(),
            wasm: BASE64.encode(bytes),
            kind: kind.as_str().to_string(),
            metadata: metadata.clone(),
            reinstall,
        };
        self.call("/install/direct", &request).await
    }

    async fn store_asset(
        &self,
        target: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), DeployError> {
        let request = StoreAssetRequest {
            target: target.to_string(),
            path: path.to_string(),
            content_type: content_type.to_string(),
            data: BASE64.encode(bytes),
        };
        let _: StoreAssetAck = self.call("/assets", &request).await?;
        Ok(())
    }
}
