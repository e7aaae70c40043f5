use anyhow::Result;

use crate::frame::Frame;
use crate::track::RawDetection;

/// Detector plus tracker behind one call.
///
/// Implementations must keep track ids stable for the same physical object across
/// frames; the rest of the crate joins frames on nothing but that id.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection and tracking on a frame, in the detector's own emission order.
    fn track(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
