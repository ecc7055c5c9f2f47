//! Webcam capture client: ships MJPG frames to the detection server.
//!
mod sensors;

use anyhow::{bail, Context, Result};
use clap::Parser;
use common::protocol::{FrameMsg, ProtoMsg};
use env_logger::TimestampPrecision;
use futures::sink::SinkExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::sensors::get_capture_fn;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Socket address of the detection server
    #[clap(long, default_value = "127.0.0.1:3001")]
    server_address: String,

    /// Stream name under which the frames are published
    #[clap(long, default_value = "cam0")]
    name: String,

    /// Capture resolution as WIDTHxHEIGHT, camera maximum if absent
    #[clap(long)]
    resolution: Option<String>,

    /// Capture frame rate in frames per second, camera maximum if absent
    #[clap(long)]
    fps: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let resolution = args
        .resolution
        .as_deref()
        .map(parse_resolution)
        .transpose()?;
    let frame_rate = args.fps.map(|fps| (1, fps));

    let capture_fn = get_capture_fn(&args.device, "MJPG", resolution, frame_rate)?;

    let stream = TcpStream::connect(&args.server_address)
        .await
        .with_context(|| format!("connecting to {}", args.server_address))?;
    log::info!("Connected to {}", args.server_address);

    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    // Tight capture loop: runs until the camera read fails or the process is
    // terminated. The camera is released when the capture closure drops.
    loop {
        let Some(frame) = capture_fn() else {
            log::error!("Camera read failed, stopping capture");
            break;
        };

        let msg = ProtoMsg::FrameMsg(FrameMsg::new(args.name.clone(), frame[..].to_vec()));
        let data = bincode::serialize(&msg).context("serializing frame message")?;
        transport
            .send(bytes::Bytes::from(data))
            .await
            .context("sending frame")?;
    }

    Ok(())
}

fn parse_resolution(spec: &str) -> Result<(u32, u32)> {
    let Some((width, height)) = spec.split_once('x') else {
        bail!("expected WIDTHxHEIGHT, got {spec}");
    };
    Ok((width.parse()?, height.parse()?))
}
