//! Engine capability trait and progress sinks

use async_trait::async_trait;
use kiln_core::domain::progress::ProgressEvent;
use kiln_core::dto::image::{ImageInspect, ImageSummary};
use std::collections::BTreeMap;
use tokio::io::AsyncRead;

use crate::error::Result;

/// Trait for progress sinks
///
/// Receives pull status lines, container output and upload progress while a
/// stream is being drained. Implement this trait to route progress to a
/// console, a buffer or nowhere.
pub trait ProgressSink: Send {
    /// Handle one progress event
    fn write(&mut self, event: ProgressEvent);
}

/// Sink that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn write(&mut self, _event: ProgressEvent) {}
}

impl ProgressSink for Vec<ProgressEvent> {
    fn write(&mut self, event: ProgressEvent) {
        self.push(event);
    }
}

/// A tar stream to upload and its total length in bytes
pub struct Archive {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub size: u64,
}

impl Archive {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static, size: u64) -> Self {
        Self {
            reader: Box::new(reader),
            size,
        }
    }
}

/// Capabilities the builder needs from a container engine
///
/// Streaming operations (`pull`, `attach_stream`, `put_archive`) return only
/// once their stream has been drained completely. `remove_container` and
/// `remove_image` succeed when the resource is already gone.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Lists images matching a `key=value` label filter, intermediates included
    async fn list_images(&self, label_filter: &str) -> Result<Vec<ImageSummary>>;

    /// Lists ids of containers, running or not, matching a label filter
    async fn list_containers(&self, label_filter: &str) -> Result<Vec<String>>;

    /// Pulls `repository:tag`, reporting status lines as they arrive
    async fn pull(&self, repository: &str, tag: &str, progress: &mut dyn ProgressSink)
    -> Result<()>;

    /// Creates a container from an image reference or id
    ///
    /// # Returns
    /// The container id
    async fn create_container(&self, image: &str, command: Option<&[String]>) -> Result<String>;

    /// Starts a created container
    async fn start(&self, container_id: &str) -> Result<()>;

    /// Streams the combined stdout and stderr of a container until it exits
    async fn attach_stream(&self, container_id: &str, output: &mut dyn ProgressSink)
    -> Result<()>;

    /// Waits for a container to exit
    ///
    /// # Returns
    /// The exit status
    async fn wait(&self, container_id: &str) -> Result<i64>;

    /// Commits a container to a new image carrying `labels`
    ///
    /// # Returns
    /// The new image id
    async fn commit(
        &self,
        container_id: &str,
        labels: &BTreeMap<String, String>,
        repository: Option<&str>,
    ) -> Result<String>;

    /// Inspects an image
    async fn inspect_image(&self, image_id: &str) -> Result<ImageInspect>;

    /// Removes a container, forcing it to stop first
    async fn remove_container(&self, container_id: &str) -> Result<()>;

    /// Removes an image
    async fn remove_image(&self, image_id: &str) -> Result<()>;

    /// Unpacks a tar stream into a container at `dest_path`
    async fn put_archive(
        &self,
        container_id: &str,
        dest_path: &str,
        archive: Archive,
        progress: &mut dyn ProgressSink,
    ) -> Result<()>;
}
