//! MAAS REST client.
//!
//! Implements [`RemoteClient`] against the MAAS 2.0 layout: collection and
//! resource paths under `api/<version>/`, form-encoded bodies, and `op=`
//! query parameters for non-CRUD operations. Every request is a single
//! attempt.

use std::sync::Arc;

use async_trait::async_trait;
use bdsync_core::{
    BlockDevice, BlockDeviceId, BlockDeviceUpdate, CreateBlockDevice, CreatePartition,
    FormatPartition, Machine, MachineId, MountPartition, Partition, PartitionId, RemoteClient,
};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::config::MaasConfig;
use crate::error::{Error, Result};

/// Client for the MAAS block device and partition API.
#[derive(Debug, Clone)]
pub struct MaasClient {
    /// Configuration for the client.
    config: Arc<MaasConfig>,
    /// Versioned API root, ending in `/`.
    api_root: Url,
    /// HTTP client with the authorization header preset.
    http_client: reqwest::Client,
}

impl MaasClient {
    /// Create a new client with custom configuration.
    ///
    /// # Errors
    ///
    /// Fails when the base URL is missing, the authorization value is not a
    /// valid header, or the HTTP client cannot be built.
    pub fn with_config(config: MaasConfig) -> Result<Self> {
        let api_root = config.api_root()?;

        let mut headers = HeaderMap::new();
        if let Some(authorization) = &config.authorization {
            let mut value = HeaderValue::from_str(authorization)
                .map_err(|e| Error::config_error(format!("Invalid authorization value: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            api_root,
            http_client,
        })
    }

    /// Create a new client for the given service root.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn with_url(base_url: Url) -> Result<Self> {
        Self::with_config(MaasConfig::with_url(base_url))
    }

    /// Get the configuration.
    pub fn config(&self) -> &MaasConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.api_root.join(path)?)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    debug!(
                        status = status.as_u16(),
                        error = %e,
                        "Failed to read MAAS error body"
                    );
                    String::new()
                }
            };
            debug!(status = status.as_u16(), body = %body, "MAAS returned an error");
            return Err(Error::unexpected_status(status.as_u16(), body));
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "GET");
        let response = self.send(self.http_client.get(url)).await?;
        decode(response).await
    }

    async fn post_form<B, T>(&self, path: &str, op: Option<&str>, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(url = %url, op, "POST");
        let mut request = self.http_client.post(url).form(body);
        if let Some(op) = op {
            request = request.query(&[("op", op)]);
        }
        let response = self.send(request).await?;
        decode(response).await
    }

    async fn post_op<B>(&self, path: &str, op: &str, body: &B) -> Result<()>
    where
        B: Serialize + ?Sized + Sync,
    {
        let url = self.endpoint(path)?;
        debug!(url = %url, op, "POST");
        self.send(self.http_client.post(url).query(&[("op", op)]).form(body))
            .await?;
        Ok(())
    }

    async fn machines(&self) -> Result<Vec<Machine>> {
        self.get_json("machines/").await
    }

    async fn block_devices(&self, machine: &MachineId) -> Result<Vec<BlockDevice>> {
        self.get_json(&devices_path(machine)).await
    }
}

#[async_trait]
impl RemoteClient for MaasClient {
    async fn find_machine(&self, fqdn: &str) -> bdsync_core::Result<Option<Machine>> {
        let machines = self
            .machines()
            .await
            .map_err(|e| e.into_remote("find_machine"))?;
        Ok(machines.into_iter().find(|m| m.fqdn == fqdn))
    }

    async fn find_block_device(
        &self,
        machine: &MachineId,
        name: &str,
    ) -> bdsync_core::Result<Option<BlockDevice>> {
        let devices = self
            .block_devices(machine)
            .await
            .map_err(|e| e.into_remote("find_block_device"))?;
        Ok(devices.into_iter().find(|d| d.name == name))
    }

    async fn get_block_device(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
    ) -> bdsync_core::Result<BlockDevice> {
        self.get_json(&device_path(machine, device))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    bdsync_core::Error::block_device_not_found(machine.as_str(), device.to_string())
                } else {
                    e.into_remote("get_block_device")
                }
            })
    }

    async fn create_block_device(
        &self,
        machine: &MachineId,
        payload: &CreateBlockDevice,
    ) -> bdsync_core::Result<BlockDevice> {
        self.post_form(&devices_path(machine), None, payload)
            .await
            .map_err(|e| e.into_remote("create_block_device"))
    }

    async fn update_block_device(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        diff: &BlockDeviceUpdate,
    ) -> bdsync_core::Result<()> {
        let result: Result<()> = async {
            let url = self.endpoint(&device_path(machine, device))?;
            debug!(url = %url, fields = ?diff.fields(), "PUT");
            self.send(self.http_client.put(url).form(diff)).await?;
            Ok(())
        }
        .await;
        result.map_err(|e| e.into_remote("update_block_device"))
    }

    async fn delete_block_device(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
    ) -> bdsync_core::Result<()> {
        let result: Result<()> = async {
            let url = self.endpoint(&device_path(machine, device))?;
            debug!(url = %url, "DELETE");
            self.send(self.http_client.delete(url)).await?;
            Ok(())
        }
        .await;
        result.map_err(|e| e.into_remote("delete_block_device"))
    }

    async fn add_device_tag(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        tag: &str,
    ) -> bdsync_core::Result<()> {
        self.post_op(&device_path(machine, device), "add_tag", &[("tag", tag)])
            .await
            .map_err(|e| e.into_remote("add_device_tag"))
    }

    async fn set_boot_device(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
    ) -> bdsync_core::Result<()> {
        let empty: [(&str, &str); 0] = [];
        self.post_op(&device_path(machine, device), "set_boot_disk", &empty)
            .await
            .map_err(|e| e.into_remote("set_boot_device"))
    }

    async fn create_partition(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        payload: &CreatePartition,
    ) -> bdsync_core::Result<Partition> {
        self.post_form(&partitions_path(machine, device), None, payload)
            .await
            .map_err(|e| e.into_remote("create_partition"))
    }

    async fn format_partition(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        partition: PartitionId,
        payload: &FormatPartition,
    ) -> bdsync_core::Result<()> {
        self.post_op(
            &partition_path(machine, device, partition),
            "format",
            payload,
        )
        .await
        .map_err(|e| e.into_remote("format_partition"))
    }

    async fn mount_partition(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        partition: PartitionId,
        payload: &MountPartition,
    ) -> bdsync_core::Result<()> {
        self.post_op(
            &partition_path(machine, device, partition),
            "mount",
            payload,
        )
        .await
        .map_err(|e| e.into_remote("mount_partition"))
    }

    async fn add_partition_tag(
        &self,
        machine: &MachineId,
        device: BlockDeviceId,
        partition: PartitionId,
        tag: &str,
    ) -> bdsync_core::Result<()> {
        self.post_op(
            &partition_path(machine, device, partition),
            "add_tag",
            &[("tag", tag)],
        )
        .await
        .map_err(|e| e.into_remote("add_partition_tag"))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| Error::invalid_response(e.to_string()))
}

fn devices_path(machine: &MachineId) -> String {
    format!("nodes/{machine}/blockdevices/")
}

fn device_path(machine: &MachineId, device: BlockDeviceId) -> String {
    format!("nodes/{machine}/blockdevices/{device}/")
}

fn partitions_path(machine: &MachineId, device: BlockDeviceId) -> String {
    format!("nodes/{machine}/blockdevices/{device}/partitions/")
}

fn partition_path(machine: &MachineId, device: BlockDeviceId, partition: PartitionId) -> String {
    format!("nodes/{machine}/blockdevices/{device}/partition/{partition}/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdsync_core::MachineStatus;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    const API: &str = "/MAAS/api/2.0";

    async fn client_for(server: &MockServer) -> std::result::Result<MaasClient, Box<dyn std::error::Error>> {
        let base_url = format!("{}/MAAS/", server.uri()).parse::<Url>()?;
        Ok(MaasClient::with_config(
            MaasConfig::with_url(base_url).authorization("OAuth test"),
        )?)
    }

    fn device_json(id: u64, name: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": name,
            "size": 27,
            "block_size": 512,
            "model": null,
            "serial": null,
            "id_path": "/dev/vdb",
            "tags": [],
            "partitions": [],
            "system_id": "abc123",
            "type": "virtual",
            "resource_uri": format!("/MAAS/api/2.0/nodes/abc123/blockdevices/{id}/")
        })
    }

    #[test]
    fn test_client_requires_base_url() {
        let result = MaasClient::with_config(MaasConfig::default());
        assert!(matches!(result, Err(Error::ConfigError { .. })));
    }

    #[test]
    fn test_client_rejects_invalid_authorization() -> TestResult {
        let config =
            MaasConfig::with_url("http://maas.example/MAAS/".parse()?).authorization("bad\nvalue");
        let result = MaasClient::with_config(config);
        assert!(matches!(result, Err(Error::ConfigError { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_find_machine_matches_fqdn() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{API}/machines/")))
            .and(header("authorization", "OAuth test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"system_id": "aaa111", "fqdn": "other.maas", "status_name": "Ready"},
                {"system_id": "abc123", "fqdn": "m1.maas", "status_name": "Deployed", "hostname": "m1"}
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let machine = client.find_machine("m1.maas").await?;

        let machine = machine.ok_or("machine not found")?;
        assert_eq!(machine.id, MachineId::new("abc123"));
        assert_eq!(machine.status, MachineStatus::Deployed);
        assert!(client.find_machine("ghost.maas").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_get_block_device_keeps_extra_fields() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{API}/nodes/abc123/blockdevices/7/")))
            .respond_with(ResponseTemplate::new(200).set_body_json(device_json(7, "vdb")))
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let device = client
            .get_block_device(&MachineId::new("abc123"), BlockDeviceId(7))
            .await?;

        assert_eq!(device.name, "vdb");
        assert_eq!(
            device.extra.get("type"),
            Some(&serde_json::json!("virtual"))
        );
        assert_eq!(serde_json::to_value(&device)?, device_json(7, "vdb"));
        Ok(())
    }

    #[tokio::test]
    async fn test_get_missing_block_device_is_not_found() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{API}/nodes/abc123/blockdevices/9/")))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let result = client
            .get_block_device(&MachineId::new("abc123"), BlockDeviceId(9))
            .await;

        assert!(matches!(
            result,
            Err(bdsync_core::Error::BlockDeviceNotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_block_device_sends_form() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{API}/nodes/abc123/blockdevices/")))
            .and(body_string(
                "name=vdb&size=27&block_size=512&id_path=%2Fdev%2Fvdb",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(device_json(7, "vdb")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let payload = CreateBlockDevice {
            name: "vdb".to_string(),
            size: 27,
            block_size: 512,
            model: None,
            serial: None,
            id_path: Some("/dev/vdb".to_string()),
        };
        let device = client
            .create_block_device(&MachineId::new("abc123"), &payload)
            .await?;

        assert_eq!(device.id, BlockDeviceId(7));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_sends_only_diff() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(format!("{API}/nodes/abc123/blockdevices/7/")))
            .and(body_string("block_size=4096"))
            .respond_with(ResponseTemplate::new(200).set_body_json(device_json(7, "vdb")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let diff = BlockDeviceUpdate {
            block_size: Some(4096),
            ..Default::default()
        };
        client
            .update_block_device(&MachineId::new("abc123"), BlockDeviceId(7), &diff)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_partition_operations_use_op_query() -> TestResult {
        let server = MockServer::start().await;
        let partition = format!("{API}/nodes/abc123/blockdevices/7/partition/3/");
        Mock::given(method("POST"))
            .and(path(partition.clone()))
            .and(query_param("op", "format"))
            .and(body_string("fstype=ext4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(partition))
            .and(query_param("op", "mount"))
            .and(body_string("mount_point=%2Fmedia"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let machine = MachineId::new("abc123");
        client
            .format_partition(
                &machine,
                BlockDeviceId(7),
                PartitionId(3),
                &FormatPartition {
                    fstype: "ext4".to_string(),
                    label: None,
                },
            )
            .await?;
        client
            .mount_partition(
                &machine,
                BlockDeviceId(7),
                PartitionId(3),
                &MountPartition {
                    mount_point: "/media".to_string(),
                    mount_options: None,
                },
            )
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_set_boot_disk_and_tag() -> TestResult {
        let server = MockServer::start().await;
        let device = format!("{API}/nodes/abc123/blockdevices/7/");
        Mock::given(method("POST"))
            .and(path(device.clone()))
            .and(query_param("op", "set_boot_disk"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(device))
            .and(query_param("op", "add_tag"))
            .and(body_string("tag=ssd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(device_json(7, "vdb")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let machine = MachineId::new("abc123");
        client.set_boot_device(&machine, BlockDeviceId(7)).await?;
        client.add_device_tag(&machine, BlockDeviceId(7), "ssd").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status_names_operation() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{API}/nodes/abc123/blockdevices/7/partitions/")))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("Not enough space on block device."),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let result = client
            .create_partition(
                &MachineId::new("abc123"),
                BlockDeviceId(7),
                &CreatePartition {
                    size: Some(100),
                    bootable: None,
                },
            )
            .await;

        match result {
            Err(bdsync_core::Error::RemoteOperationFailed { operation, reason }) => {
                assert_eq!(operation, "create_partition");
                assert!(reason.contains("400"));
                assert!(reason.contains("Not enough space"));
            }
            other => return Err(format!("unexpected result: {other:?}").into()),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status_without_body_keeps_status() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{API}/nodes/abc123/blockdevices/7/")))
            .and(query_param("op", "set_boot_disk"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let result = client
            .set_boot_device(&MachineId::new("abc123"), BlockDeviceId(7))
            .await;

        match result {
            Err(bdsync_core::Error::RemoteOperationFailed { operation, reason }) => {
                assert_eq!(operation, "set_boot_device");
                assert!(reason.contains("503"));
            }
            other => return Err(format!("unexpected result: {other:?}").into()),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{API}/nodes/abc123/blockdevices/")))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let result = client
            .find_block_device(&MachineId::new("abc123"), "vdb")
            .await;

        match result {
            Err(bdsync_core::Error::RemoteOperationFailed { operation, reason }) => {
                assert_eq!(operation, "find_block_device");
                assert!(reason.contains("invalid response"));
            }
            other => return Err(format!("unexpected result: {other:?}").into()),
        }
        Ok(())
    }
}
