pub mod camera;
pub mod detector;
pub mod frame;
pub mod geometry;
pub mod imgproc;
pub mod intrinsics;
pub mod overlay;
pub mod snapshot;

pub use camera::CameraCaptureThread;
pub use detector::{CanvasDetector, DetectionReport};
pub use frame::{Frame, FrameSlot, SharedFrame};
pub use geometry::{Corners, Homography, Point};
pub use intrinsics::CameraIntrinsics;
pub use overlay::{StationStatus, StatusSnapshot};

/// Physical canvas geometry. A 180 mm white square carries a concentric
/// 20 mm black border, leaving a 140 mm inner drawing area.
pub const OUTER_SIDE_MM: f32 = 180.0;
pub const BORDER_MM: f32 = 20.0;
pub const INNER_SIDE_MM: f32 = 140.0;

/// Side length of the rectified raster the pipeline consumes.
pub const RASTER_SIZE: u32 = 720;

/// inner/outer side ratio (140/180).
pub const INNER_RATIO: f32 = INNER_SIDE_MM / OUTER_SIDE_MM;
