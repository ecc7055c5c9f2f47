//! TCP ingest socket for camera frame streams.
//!
use std::sync::Arc;

use futures::StreamExt;
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use common::protocol::ProtoMsg;

use crate::pubsub::NamedPubSub;

/// Prefix of the pub/sub channel feeding the inferer.
pub const INFER_CHANNEL_PREFIX: &str = "infer";

/// Spawn the listener accepting incoming frame streams.
pub fn spawn_data_socket(
    pubsub: Arc<NamedPubSub>,
    addr: String,
) -> JoinHandle<Result<(), std::io::Error>> {
    tokio::spawn(async move {
        let listener = TcpListener::bind(&addr).await?;
        log::info!("Accepting frame streams on {}", &addr);

        loop {
            let (socket, _) = listener.accept().await?;
            let pubsub_ = Arc::clone(&pubsub);
            tokio::spawn(async move {
                handle_incoming(socket, pubsub_).await?;
                Ok::<_, std::io::Error>(())
            });
        }
    })
}

/// Handle one connected capture client.
///
/// Every received frame is published twice: raw passthrough under the stream
/// name and as inference feed under `infer_{name}`.
async fn handle_incoming(stream: TcpStream, pubsub: Arc<NamedPubSub>) -> std::io::Result<()> {
    log::info!("{}: new connection", stream.peer_addr()?);

    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    let mut sender_raw = None;
    let mut sender_infer = None;

    while let Some(Ok(frame)) = transport.next().await {
        let proto_msg = match ProtoMsg::deserialize(&frame[..]) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Dropping malformed frame message: {}", e);
                continue;
            }
        };

        let ProtoMsg::FrameMsg(frame_msg) = proto_msg;
        if sender_raw.is_none() {
            sender_raw = Some(pubsub.get_sender(&frame_msg.id).await);
        }
        if sender_infer.is_none() {
            sender_infer = Some(
                pubsub
                    .get_sender(&format!("{}_{}", INFER_CHANNEL_PREFIX, &frame_msg.id))
                    .await,
            );
        }

        if let Some(sender) = &sender_raw {
            if sender.send(frame_msg.data.clone()).is_err() {
                log::debug!("Send error for id {} - probably no listener", &frame_msg.id);
            }
        }

        if let Some(sender) = &sender_infer {
            if sender.send(frame_msg.data).is_err() {
                log::debug!(
                    "Send error infer for id {} - probably no listener",
                    &frame_msg.id
                );
            }
        }
    }

    Ok(())
}
