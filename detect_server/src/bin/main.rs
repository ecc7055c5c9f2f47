//! Waste detection server binary.
//!
use std::{net::SocketAddr, sync::Arc};

use axum::{
    routing::{get, post},
    Extension, Router,
};
use clap::Parser;
use env_logger::TimestampPrecision;

use detect_server::{
    data_socket::spawn_data_socket,
    endpoints::{annotate_image, detect_stream, healthcheck, index, named_stream},
    hub,
    inferer::{annotated_channel, spawn_feed, Inferer},
    meter::spawn_meter_logger,
    nn::WasteModel,
    pipeline::{Annotator, DEFAULT_CONFIDENCE_THRESHOLD},
    pubsub::NamedPubSub,
};

/// Frames queued for inference; newer frames are dropped while full.
const INFER_QUEUE_CAPACITY: usize = 4;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the HTTP UI on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Address of the socket receiving camera frame streams
    #[clap(long, default_value = "127.0.0.1:3001")]
    socket_address: String,

    /// Model hub repository holding the pretrained detection model
    #[clap(long, default_value = "Nhyira-EM/Objectdetection")]
    model_repo: String,

    /// Model filename inside the hub repository
    #[clap(long, default_value = "Imgdetec.onnx")]
    model_file: String,

    /// Confidence threshold below which detections are labeled "other"
    #[clap(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    confidence_threshold: f32,

    /// Name of the camera stream to run detection on
    #[clap(long, default_value = "cam0")]
    stream_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    // Fetch the pretrained model once and build the annotation pipeline
    let model_path = hub::ensure_model(&args.model_repo, &args.model_file).await?;
    let model = WasteModel::load(&model_path)?;
    let annotator = Arc::new(Annotator::new(
        Box::new(model),
        args.confidence_threshold,
    ));

    // Pub/Sub engine to communicate between data input, inference and HTTP
    let pubsub = Arc::new(NamedPubSub::new());

    // Feed received frames into the inferer, bounded with frame dropping
    let (queue_tx, queue_rx) = thingbuf::mpsc::channel(INFER_QUEUE_CAPACITY);
    spawn_feed(Arc::clone(&pubsub), args.stream_name.clone(), queue_tx);

    // Spawn a separate task to run the inference on
    let annotated_tx = pubsub
        .get_sender(&annotated_channel(&args.stream_name))
        .await;
    let inferer = Inferer::new(queue_rx, annotated_tx, Arc::clone(&annotator));
    tokio::spawn(async move {
        inferer.run().await;
    });

    // Socket receiving image streams via the network
    spawn_data_socket(Arc::clone(&pubsub), args.socket_address.clone());

    spawn_meter_logger();

    // HTTP server with endpoints
    let app = Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/annotate", post(annotate_image))
        .route("/stream", get(named_stream))
        .route("/detect_stream", get(detect_stream))
        .layer(Extension(pubsub))
        .layer(Extension(annotator));

    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving UI on http://{}", &addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
