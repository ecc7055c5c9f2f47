//! Endpoints of the HTTP server.
//!
use std::{convert::Infallible, io::Cursor, sync::Arc};

use axum::{
    body::StreamBody,
    extract::{Multipart, Query},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    Extension,
};
use futures::StreamExt;
use image::ImageOutputFormat;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    as_jpeg_stream_item,
    inferer::annotated_channel,
    meter::METER,
    pipeline::{annotate_frames, Annotator},
    pubsub::NamedPubSub,
};

const MULTIPART_MIME: &str = "multipart/x-mixed-replace; boundary=frame";

/// Search parameters available to streams.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    name: Option<String>,
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Landing page: upload form plus the annotated live stream.
pub async fn index() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<body>
    <div class="container">
        <h3>Waste Detection</h3>
        <form action="/annotate" method="post" enctype="multipart/form-data">
            <input type="file" name="image" accept="image/jpeg,image/png">
            <input type="submit" value="Annotate image">
        </form>
        <h3>Live Detection</h3>
        <img src="/detect_stream?name=cam0" width="100%">
    </div>
</body>
</html>
"#,
    )
}

/// Still-image path: accept an uploaded image, return the annotated JPEG.
pub async fn annotate_image(
    Extension(annotator): Extension<Arc<Annotator>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        if field.name() != Some("image") {
            continue;
        }

        let data = field.bytes().await.map_err(bad_request)?;
        let image = image::load_from_memory(&data).map_err(bad_request)?.to_rgb8();

        // A single uploaded image is a finite frame source of length one
        let frames = annotate_frames(annotator, futures::stream::iter([image]));
        futures::pin_mut!(frames);
        let annotated = match frames.next().await {
            Some(result) => {
                result.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
            }
            None => {
                return Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "pipeline yielded no frame".to_owned(),
                ))
            }
        };

        let mut buf = Vec::new();
        annotated
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(90))
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        return Ok(([(header::CONTENT_TYPE, "image/jpeg")], buf));
    }

    Err((StatusCode::BAD_REQUEST, "missing field 'image'".to_owned()))
}

/// Raw passthrough of a received camera stream.
pub async fn named_stream(
    Extension(pubsub): Extension<Arc<NamedPubSub>>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let name = params.name.unwrap_or_else(|| "cam0".into());
    log::info!("Raw stream for {} requested", &name);

    let rx = pubsub.get_receiver(&name).await;
    multipart_jpeg_response(rx, || METER.tick_raw())
}

/// Annotated stream of a camera feed.
pub async fn detect_stream(
    Extension(pubsub): Extension<Arc<NamedPubSub>>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let name = params.name.unwrap_or_else(|| "cam0".into());
    log::info!("Annotated stream for {} requested", &name);

    let rx = pubsub.get_receiver(&annotated_channel(&name)).await;
    multipart_jpeg_response(rx, || METER.tick_annotated())
}

/// Turn a broadcast of JPEG buffers into a multipart stream response.
///
/// Lagged subscribers skip frames instead of terminating the response.
fn multipart_jpeg_response(
    rx: crate::BroadcastReceiver,
    tick: impl Fn() + Send + 'static,
) -> impl IntoResponse {
    let stream = BroadcastStream::new(rx).filter_map(move |item| {
        let chunk = item.ok().map(|jpeg| {
            tick();
            Ok::<_, Infallible>(as_jpeg_stream_item(&jpeg))
        });
        async move { chunk }
    });

    let body = StreamBody::new(stream);
    let headers = [(header::CONTENT_TYPE, MULTIPART_MIME)];

    (headers, body)
}

fn bad_request(err: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}
