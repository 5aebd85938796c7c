//! Firmware delivery traits.
//!
//! The transport that actually fetches a new image (serial, CAN, network) is
//! outside this crate.  During an upgrade the orchestrator hands it a sink;
//! the transport pushes the image through it chunk by chunk and reports the
//! overall outcome.

use crate::Result;

/// Receives the new firmware image during an upgrade.  Chunks are laid out
/// back to back starting at offset zero of the storage region.
pub trait DownloadSink {
    /// Accept the next chunk.  A failed write is reported to the caller, but
    /// the sink's write position still advances by the chunk's length.
    fn handle_chunk(&mut self, chunk: &[u8]) -> Result<()>;
}

/// A data source that can deliver one complete firmware image into a sink.
pub trait Downloader {
    /// Stream the image.  An error aborts the upgrade and is returned from
    /// [`crate::Bootloader::upgrade_app`] unchanged.
    fn download(&mut self, sink: &mut dyn DownloadSink) -> Result<()>;
}
