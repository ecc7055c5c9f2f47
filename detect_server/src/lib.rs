//! Waste detection server.
//!
//! Receives JPEG frame streams from capture clients, runs a pretrained
//! waste-detection model on them and serves raw and annotated streams plus a
//! still-image upload endpoint over HTTP.
pub mod data_socket;
pub mod endpoints;
pub mod hub;
pub mod inferer;
pub mod meter;
pub mod nn;
pub mod pipeline;
pub mod pubsub;

/// Sender side of a named broadcast channel carrying encoded frames.
pub type BroadcastSender = tokio::sync::broadcast::Sender<Vec<u8>>;
/// Receiver side of a named broadcast channel carrying encoded frames.
pub type BroadcastReceiver = tokio::sync::broadcast::Receiver<Vec<u8>>;

/// Sender side of the bounded inference queue.
pub type JpegQueueSender = thingbuf::mpsc::Sender<Vec<u8>>;
/// Receiver side of the bounded inference queue.
pub type JpegQueueReceiver = thingbuf::mpsc::Receiver<Vec<u8>>;

/// Wrap a JPEG buffer as one item of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Vec<u8> {
    [
        "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
        data,
        "\r\n\r\n".as_bytes(),
    ]
    .concat()
}
