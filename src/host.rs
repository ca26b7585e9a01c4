use std::fmt;
use std::sync::Arc;

use crate::images::ImageMaterializer;
use crate::transport::container::ContainerBridge;

/// Which kind of runtime the client is embedded in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HostKind {
    /// Plain process: a CLI, a desktop app, a test.
    #[default]
    Standard,
    /// The mini-program container, which may expose a managed call path
    /// and a local file system for decoded images.
    MiniProgram,
}

/// Capabilities probed from the embedding runtime.
///
/// A `Standard` host never carries capabilities; they are only consulted
/// inside the mini-program container.
#[derive(Clone, Default)]
pub struct Host {
    kind: HostKind,
    container: Option<Arc<dyn ContainerBridge>>,
    materializer: Option<Arc<dyn ImageMaterializer>>,
}

impl Host {
    pub fn standard() -> Self {
        Self::default()
    }

    pub fn mini_program() -> Self {
        Self {
            kind: HostKind::MiniProgram,
            ..Self::default()
        }
    }

    pub fn with_container(mut self, bridge: Arc<dyn ContainerBridge>) -> Self {
        self.container = Some(bridge);
        self
    }

    pub fn with_materializer(mut self, materializer: Arc<dyn ImageMaterializer>) -> Self {
        self.materializer = Some(materializer);
        self
    }

    pub fn kind(&self) -> HostKind {
        self.kind
    }

    pub fn is_mini_program(&self) -> bool {
        self.kind == HostKind::MiniProgram
    }

    /// The container-invocation capability, if this host exposes one.
    pub fn container(&self) -> Option<Arc<dyn ContainerBridge>> {
        if self.is_mini_program() {
            self.container.clone()
        } else {
            None
        }
    }

    /// The image-to-file capability, if this host exposes one.
    pub fn materializer(&self) -> Option<Arc<dyn ImageMaterializer>> {
        if self.is_mini_program() {
            self.materializer.clone()
        } else {
            None
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("kind", &self.kind)
            .field("container", &self.container.is_some())
            .field("materializer", &self.materializer.is_some())
            .finish()
    }
}
