//! `info/refs` advertisement for both services.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use git_store::{ObjectId, Repository};

use crate::config::AccessMode;
use crate::errors::GitHttpError;
use crate::pkt::{PKT_FLUSH, encode_pkt_line};
use crate::state::GitHttp;

pub(crate) fn service_mode(service: &str) -> Option<AccessMode> {
    match service {
        "git-upload-pack" => Some(AccessMode::Read),
        "git-receive-pack" => Some(AccessMode::Write),
        _ => None,
    }
}

pub(crate) fn service_enabled(state: &GitHttp, mode: AccessMode) -> Result<(), GitHttpError> {
    let enabled = match mode {
        AccessMode::Read => state.options().enable_upload_pack,
        AccessMode::Write => state.options().enable_receive_pack,
    };
    if enabled {
        Ok(())
    } else {
        Err(GitHttpError::Forbidden("service is disabled".into()))
    }
}

pub async fn handle_info_refs(
    state: &GitHttp,
    headers: &HeaderMap,
    route: &str,
    service: Option<&str>,
) -> Response {
    let Some(service) = service else {
        return GitHttpError::BadRequest("service parameter is required".into()).into_response();
    };
    let Some(mode) = service_mode(service) else {
        return GitHttpError::BadRequest(format!("unsupported service {service:?}"))
            .into_response();
    };
    if let Err(err) = service_enabled(state, mode) {
        return err.into_response();
    }

    let (name, repo) = match state.resolve_repository(headers, route) {
        Ok(resolved) => resolved,
        Err(err) => return err.into_response(),
    };
    if !state
        .options()
        .authorizer
        .authorize(headers, &name, mode)
        .await
    {
        return GitHttpError::Forbidden("access denied".into()).into_response();
    }

    let body = match advertisement(&repo, service, &state.options().capabilities()) {
        Ok(body) => body,
        Err(err) => return GitHttpError::from(err).into_response(),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("application/x-git-{service}-advertisement"),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(body))
        .expect("response build")
}

/// `# service=` banner, flush, then one pkt-line per ref (HEAD first when
/// resolvable, the rest sorted) with the capability list after a NUL on the
/// first line. An empty repository advertises the capabilities on a
/// `capabilities^{}` placeholder line so clients can still push.
fn advertisement(
    repo: &Repository,
    service: &str,
    capabilities: &str,
) -> git_store::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(512);
    body.extend_from_slice(&encode_pkt_line(
        format!("# service={service}\n").as_bytes(),
    ));
    body.extend_from_slice(PKT_FLUSH);

    let mut refs: Vec<(String, ObjectId)> = Vec::new();
    if let Some(head) = repo.refs().head_id()? {
        refs.push(("HEAD".to_string(), head));
    }
    refs.extend(repo.refs().sorted());

    if refs.is_empty() {
        let zero = ObjectId::zero(repo.hash_kind());
        body.extend_from_slice(&encode_pkt_line(
            format!("{zero} capabilities^{{}}\0{capabilities}\n").as_bytes(),
        ));
    } else {
        for (index, (name, id)) in refs.iter().enumerate() {
            let line = if index == 0 {
                format!("{id} {name}\0{capabilities}\n")
            } else {
                format!("{id} {name}\n")
            };
            body.extend_from_slice(&encode_pkt_line(line.as_bytes()));
        }
    }
    body.extend_from_slice(PKT_FLUSH);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use git_store::HashKind;
    use git_store::testing;
    use tempfile::TempDir;

    use crate::config::GitHttpOptions;
    use crate::pkt::{Pkt, decode_pkt_lines};

    use super::*;

    async fn body_bytes(resp: Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    fn state_with_repo(files: &[(&str, &[u8])]) -> (TempDir, GitHttp, Option<ObjectId>) {
        let root = TempDir::new().unwrap();
        let repo = Repository::init_bare(root.path().join("proj.git"), HashKind::Sha1).unwrap();
        let tip = if files.is_empty() {
            None
        } else {
            Some(testing::seed_commit(&repo, "refs/heads/main", files, "seed").unwrap())
        };
        let state = GitHttp::new(GitHttpOptions::new(root.path()));
        (root, state, tip)
    }

    #[tokio::test]
    async fn advertisement_framing() {
        let (_root, state, tip) = state_with_repo(&[("README.md", b"# Hi")]);
        let resp =
            handle_info_refs(&state, &HeaderMap::new(), "proj", Some("git-upload-pack")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "application/x-git-upload-pack-advertisement"
        );

        let body = body_bytes(resp).await;
        let pkts = decode_pkt_lines(&body).unwrap();
        assert!(matches!(&pkts[0], Pkt::Data(d) if d == b"# service=git-upload-pack\n"));
        assert_eq!(pkts[1], Pkt::Flush);

        let Pkt::Data(first_ref) = &pkts[2] else {
            panic!("expected a ref line");
        };
        let tip = tip.unwrap().to_string();
        let text = String::from_utf8_lossy(first_ref);
        assert!(text.starts_with(&format!("{tip} HEAD\0")));
        assert!(text.contains("report-status"));
        assert!(text.contains("side-band-64k"));
        assert!(text.contains("ofs-delta"));
        assert!(text.contains("delete-refs"));
        assert!(text.contains("agent=git-store/"));

        let Pkt::Data(second_ref) = &pkts[3] else {
            panic!("expected a second ref line");
        };
        assert_eq!(
            String::from_utf8_lossy(second_ref),
            format!("{tip} refs/heads/main\n")
        );
        assert_eq!(*pkts.last().unwrap(), Pkt::Flush);
    }

    #[tokio::test]
    async fn empty_repo_advertises_capabilities_placeholder() {
        let (_root, state, _) = state_with_repo(&[]);
        let resp =
            handle_info_refs(&state, &HeaderMap::new(), "proj", Some("git-receive-pack")).await;
        let body = body_bytes(resp).await;
        let pkts = decode_pkt_lines(&body).unwrap();
        let Pkt::Data(line) = &pkts[2] else {
            panic!("expected placeholder line");
        };
        let text = String::from_utf8_lossy(line);
        assert!(text.starts_with(&format!("{} capabilities^{{}}\0", "0".repeat(40))));
    }

    #[tokio::test]
    async fn rejects_unknown_service_and_missing_repo() {
        let (_root, state, _) = state_with_repo(&[("f", b"x")]);
        let resp = handle_info_refs(&state, &HeaderMap::new(), "proj", Some("git-evil")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = handle_info_refs(&state, &HeaderMap::new(), "proj", None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp =
            handle_info_refs(&state, &HeaderMap::new(), "ghost", Some("git-upload-pack")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp =
            handle_info_refs(&state, &HeaderMap::new(), "bad name", Some("git-upload-pack")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn disabled_service_is_forbidden() {
        let root = TempDir::new().unwrap();
        Repository::init_bare(root.path().join("proj.git"), HashKind::Sha1).unwrap();
        let mut options = GitHttpOptions::new(root.path());
        options.enable_receive_pack = false;
        let state = GitHttp::new(options);
        let resp =
            handle_info_refs(&state, &HeaderMap::new(), "proj", Some("git-receive-pack")).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
