//! カメラフレームの受信（エッジ端末の MJPEG ストリーム）

pub mod frame;
pub mod mjpeg;
pub mod stream;

pub use frame::Frame;
pub use mjpeg::MjpegDecoder;
pub use stream::CameraStream;
