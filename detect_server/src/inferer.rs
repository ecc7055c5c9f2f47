//! Inference task: consumes queued camera frames, publishes annotated ones.
//!
use std::{io::Cursor, sync::Arc};

use async_stream::stream;
use futures::{pin_mut, StreamExt};
use image::{ImageOutputFormat, RgbImage};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};

use crate::{
    data_socket::INFER_CHANNEL_PREFIX,
    pipeline::{annotate_frames, Annotator},
    pubsub::NamedPubSub,
    BroadcastSender, JpegQueueReceiver, JpegQueueSender,
};

const JPEG_QUALITY: u8 = 90;

/// Name of the pub/sub channel carrying annotated frames for a stream.
pub fn annotated_channel(name: &str) -> String {
    format!("annotated_{}", name)
}

/// Bridge a stream's inference feed into the bounded queue.
///
/// Frames are dropped, not buffered, while the inferer is busy.
pub fn spawn_feed(
    pubsub: Arc<NamedPubSub>,
    name: String,
    queue_tx: JpegQueueSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = pubsub
            .get_receiver(&format!("{}_{}", INFER_CHANNEL_PREFIX, &name))
            .await;
        loop {
            match rx.recv().await {
                Ok(jpeg) => match queue_tx.try_send_ref() {
                    Ok(mut slot) => {
                        slot.clear();
                        slot.extend_from_slice(&jpeg);
                    }
                    Err(_) => {
                        log::debug!("Inference queue full, dropping frame for {}", &name);
                    }
                },
                Err(RecvError::Lagged(n)) => {
                    log::debug!("Inference feed for {} lagged by {} frames", &name, n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Runs the annotation pipeline over the live frame feed.
pub struct Inferer {
    queue_rx: JpegQueueReceiver,
    annotated_tx: BroadcastSender,
    annotator: Arc<Annotator>,
}

impl Inferer {
    pub fn new(
        queue_rx: JpegQueueReceiver,
        annotated_tx: BroadcastSender,
        annotator: Arc<Annotator>,
    ) -> Self {
        Self {
            queue_rx,
            annotated_tx,
            annotator,
        }
    }

    /// Decode, annotate and re-publish frames until the queue closes.
    ///
    /// Inference blocks this task per frame; there is no timeout on it.
    pub async fn run(&self) {
        let frames = stream! {
            while let Some(jpeg) = self.queue_rx.recv_ref().await {
                let decoded = image::load_from_memory(&jpeg);
                drop(jpeg);
                match decoded {
                    Ok(img) => yield img.to_rgb8(),
                    Err(e) => log::warn!("Skipping undecodable frame: {}", e),
                }
            }
        };

        let annotated = annotate_frames(Arc::clone(&self.annotator), frames);
        pin_mut!(annotated);

        while let Some(result) = annotated.next().await {
            match result {
                Ok(frame) => {
                    if let Some(buf) = encode_jpeg(&frame) {
                        // Failing to send just means nobody is watching
                        self.annotated_tx.send(buf).ok();
                    }
                }
                Err(e) => log::warn!("{}", e),
            }
        }
    }
}

fn encode_jpeg(frame: &RgbImage) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    match frame.write_to(
        &mut Cursor::new(&mut buf),
        ImageOutputFormat::Jpeg(JPEG_QUALITY),
    ) {
        Ok(()) => Some(buf),
        Err(e) => {
            log::warn!("Failed to encode annotated frame: {}", e);
            None
        }
    }
}
