//! `git-upload-pack`: want/have negotiation and pack streaming. Haves are
//! accepted but not used for a common-ancestor cut; the response is always
//! `NAK` followed by everything reachable from the wants, which every
//! client accepts at the cost of larger fetches.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use git_store::{ObjectId, pack};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::AccessMode;
use crate::errors::GitHttpError;
use crate::pkt::{PKT_FLUSH, Pkt, SidebandWriter, decode_pkt_lines, encode_pkt_line};
use crate::state::GitHttp;

#[derive(Debug, Default)]
struct UploadRequest {
    wants: Vec<ObjectId>,
    haves: Vec<ObjectId>,
    capabilities: Vec<String>,
}

impl UploadRequest {
    fn side_band_64k(&self) -> bool {
        self.capabilities.iter().any(|c| c == "side-band-64k")
    }
}

/// Wants carry capabilities on the first line; unknown capabilities are
/// tolerated.
fn parse_upload_request(pkts: &[Pkt]) -> Result<UploadRequest, GitHttpError> {
    let mut req = UploadRequest::default();
    for pkt in pkts {
        let Pkt::Data(line) = pkt else { continue };
        let text = std::str::from_utf8(line)
            .map_err(|_| GitHttpError::BadRequest("non-utf8 request line".into()))?
            .trim_end_matches('\n');
        if let Some(rest) = text.strip_prefix("want ") {
            let mut tokens = rest.split_whitespace();
            let hex = tokens
                .next()
                .ok_or_else(|| GitHttpError::BadRequest("want line without hash".into()))?;
            let id = ObjectId::from_hex(hex)
                .map_err(|_| GitHttpError::BadRequest(format!("bad want hash {hex:?}")))?;
            if req.wants.is_empty() {
                req.capabilities = tokens.map(str::to_string).collect();
            }
            req.wants.push(id);
        } else if let Some(rest) = text.strip_prefix("have ") {
            if let Ok(id) = ObjectId::from_hex(rest.trim()) {
                req.haves.push(id);
            }
        }
        // "done" and anything else: nothing to do
    }
    if req.wants.is_empty() {
        return Err(GitHttpError::BadRequest("no want lines in request".into()));
    }
    Ok(req)
}

pub async fn handle_upload_pack(
    state: &GitHttp,
    headers: HeaderMap,
    route: &str,
    body: Body,
) -> Response {
    if !state.options().enable_upload_pack {
        return GitHttpError::Forbidden("service is disabled".into()).into_response();
    }
    let (name, repo) = match state.resolve_repository(&headers, route) {
        Ok(resolved) => resolved,
        Err(err) => return err.into_response(),
    };
    if !state
        .options()
        .authorizer
        .authorize(&headers, &name, AccessMode::Read)
        .await
    {
        return GitHttpError::Forbidden("access denied".into()).into_response();
    }

    let bytes = match axum::body::to_bytes(body, state.options().max_request_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => return GitHttpError::BadRequest("invalid request body".into()).into_response(),
    };
    let pkts = match decode_pkt_lines(&bytes) {
        Ok(pkts) => pkts,
        Err(err) => {
            return GitHttpError::BadRequest(format!("pkt parse error: {err}")).into_response();
        }
    };
    let request = match parse_upload_request(&pkts) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    let sideband = request.side_band_64k();
    let (tx, rx) = mpsc::channel::<Bytes>(16);

    // no common-ancestor negotiation: always NAK, then the pack
    if tx
        .send(Bytes::from(encode_pkt_line(b"NAK\n")))
        .await
        .is_err()
    {
        return GitHttpError::Internal("response channel closed".into()).into_response();
    }

    let wants = request.wants.clone();
    tokio::task::spawn_blocking(move || {
        let mut out = SidebandWriter::new(tx.clone(), sideband);
        let result = pack::reachable_objects(&repo, &wants).and_then(|ids| {
            if sideband {
                out.progress(&format!("Enumerating objects: {}, done.", ids.len()));
            }
            pack::write_pack(repo.objects(), &ids, &mut out)?;
            std::io::Write::flush(&mut out)?;
            Ok(())
        });
        if let Err(err) = result {
            tracing::warn!("upload-pack streaming failed: {err}");
            out.fatal("error while writing pack");
        }
        // without side-band the pack runs raw to the end of the body
        if sideband {
            let _ = tx.blocking_send(Bytes::from_static(PKT_FLUSH));
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok::<Bytes, std::convert::Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-git-upload-pack-result")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .expect("response build")
}
