//! Image assembly and registry push.

pub mod auth;
pub mod tarball;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use oci_client::client::{ClientConfig, Config as OciConfig, ImageLayer};
use oci_client::manifest::{
    OciImageManifest, IMAGE_CONFIG_MEDIA_TYPE, IMAGE_LAYER_MEDIA_TYPE,
};
use oci_client::{Client, Reference};
use oci_spec::image::{
    Arch, ConfigBuilder, ImageConfigurationBuilder, Os, RootFsBuilder,
};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::aws::AwsClients;
use crate::error::{Result, SyncError};
use crate::spec::SyncSpec;

use auth::Keychain;

/// Contents of the base layer: TLS roots and the agent binary, so the
/// produced image can run the same sync again.
const BASE_PATHS: &[&str] = &["/etc/ssl/certs/ca-certificates.crt", "/s3-sync"];
const ENTRYPOINT: &str = "/s3-sync";

/// Triggered after a sync pass reports a change.
#[async_trait]
pub trait Build: Send {
    async fn build(&mut self) -> Result<()>;
}

/// Assembles the layered image from the mirrored trees and pushes it to
/// every configured tag.
pub struct ImageBuilder {
    tags: Vec<Reference>,
    paths: Vec<PathBuf>,
    cmd: Vec<String>,
    keychain: Keychain,
    client: Client,
    base_layer: Option<ImageLayer>,
}

impl ImageBuilder {
    /// Derive the builder inputs from the sync specs: one volume per `dst`
    /// and a `--sync <csv>` pair per spec so the image re-runs the same
    /// configuration.
    pub fn from_specs(tags: &[String], specs: &[SyncSpec], aws: AwsClients) -> Result<Self> {
        let mut paths = Vec::with_capacity(specs.len());
        let mut cmd = Vec::with_capacity(specs.len() * 2);
        for spec in specs {
            paths.push(PathBuf::from(&spec.dst));
            cmd.push("--sync".to_string());
            cmd.push(spec.to_csv()?);
        }
        Self::new(tags, paths, cmd, aws)
    }

    /// Tags are parsed and validated here, so a malformed tag fails before
    /// the first pass runs.
    pub fn new(
        tags: &[String],
        paths: Vec<PathBuf>,
        cmd: Vec<String>,
        aws: AwsClients,
    ) -> Result<Self> {
        let tags = tags
            .iter()
            .map(|tag| {
                tag.parse::<Reference>()
                    .map_err(|e| SyncError::Config(format!("invalid image tag '{tag}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            tags,
            paths,
            cmd,
            keychain: Keychain::new(aws),
            client: Client::new(ClientConfig::default()),
            base_layer: None,
        })
    }

    /// Assemble base and data layers and push the image to every tag.
    ///
    /// A push failure aborts the build; tags already pushed are not rolled
    /// back.
    pub async fn build(&mut self) -> Result<()> {
        let base = self.base_layer()?;
        let data = layer_from_paths(&self.paths)?;
        let layers = vec![base, data];
        let diff_ids: Vec<String> = layers.iter().map(|layer| digest(&layer.data)).collect();

        let config_json = self.image_config(&diff_ids)?;
        let config = OciConfig::new(config_json, IMAGE_CONFIG_MEDIA_TYPE.to_string(), None);
        let manifest = OciImageManifest::build(&layers, &config, None);

        for tag in &self.tags {
            let authenticator = self.keychain.resolve(tag.resolve_registry()).await?;
            let auth = authenticator.authorization().await?;
            info!("pushing {tag}");
            self.client
                .push(tag, &layers, config.clone(), &auth, Some(manifest.clone()))
                .await
                .map_err(|e| SyncError::Registry(format!("push {tag}: {e}")))?;
        }
        Ok(())
    }

    /// The base layer is immutable for the process lifetime; build it once.
    fn base_layer(&mut self) -> Result<ImageLayer> {
        if let Some(layer) = &self.base_layer {
            return Ok(layer.clone());
        }
        let paths: Vec<PathBuf> = BASE_PATHS.iter().map(PathBuf::from).collect();
        let layer = layer_from_paths(&paths)?;
        self.base_layer = Some(layer.clone());
        Ok(layer)
    }

    fn image_config(&self, diff_ids: &[String]) -> Result<Vec<u8>> {
        let volumes: Vec<String> = self
            .paths
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect();
        let config = ConfigBuilder::default()
            .entrypoint(vec![ENTRYPOINT.to_string()])
            .cmd(self.cmd.clone())
            .volumes(volumes)
            .build()
            .map_err(|e| SyncError::Build(format!("image config: {e}")))?;
        let rootfs = RootFsBuilder::default()
            .typ("layers".to_string())
            .diff_ids(diff_ids.to_vec())
            .build()
            .map_err(|e| SyncError::Build(format!("image rootfs: {e}")))?;
        let configuration = ImageConfigurationBuilder::default()
            .architecture(Arch::Amd64)
            .os(Os::Linux)
            .created(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
            .config(config)
            .rootfs(rootfs)
            .build()
            .map_err(|e| SyncError::Build(format!("image configuration: {e}")))?;
        Ok(serde_json::to_vec(&configuration)?)
    }
}

#[async_trait]
impl Build for ImageBuilder {
    async fn build(&mut self) -> Result<()> {
        ImageBuilder::build(self).await
    }
}

fn layer_from_paths(paths: &[PathBuf]) -> Result<ImageLayer> {
    let data = tarball::create(paths, Vec::new())?;
    Ok(ImageLayer::new(
        data,
        IMAGE_LAYER_MEDIA_TYPE.to_string(),
        None,
    ))
}

fn digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}
