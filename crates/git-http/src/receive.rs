//! `git-receive-pack`: parses push commands, takes the multi-ref lock,
//! ingests the incoming pack, enforces CAS and fast-forward rules per
//! command, applies the survivors, and reports per-ref status. A rejected
//! command never blocks its siblings.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use git_store::refs::Expected;
use git_store::{GitError, ObjectId, pack};

use crate::config::{AccessMode, RefUpdate};
use crate::errors::GitHttpError;
use crate::pkt::{PKT_FLUSH, Pkt, decode_pkt_section, encode_pkt_line, sideband_wrap};
use crate::state::GitHttp;

#[derive(Debug, Clone)]
struct PushCommand {
    old: ObjectId,
    new: ObjectId,
    name: String,
}

impl PushCommand {
    fn is_delete(&self) -> bool {
        self.new.is_zero()
    }

    fn is_create(&self) -> bool {
        self.old.is_zero()
    }
}

/// `<old-hex> <new-hex> <refname>`, with `\0capabilities` allowed on the
/// first line. Unknown capabilities are kept but ignored.
fn parse_commands(pkts: &[Pkt]) -> Result<(Vec<PushCommand>, Vec<String>), GitHttpError> {
    let mut commands = Vec::new();
    let mut capabilities = Vec::new();
    for pkt in pkts {
        let Pkt::Data(line) = pkt else { continue };
        let (command, caps) = match line.iter().position(|b| *b == 0) {
            Some(nul) => (&line[..nul], Some(&line[nul + 1..])),
            None => (&line[..], None),
        };
        if let Some(caps) = caps {
            let text = String::from_utf8_lossy(caps);
            capabilities.extend(text.split_whitespace().map(str::to_string));
        }
        let text = std::str::from_utf8(command)
            .map_err(|_| GitHttpError::BadRequest("non-utf8 command line".into()))?
            .trim_end_matches('\n');
        if text.is_empty() {
            continue;
        }
        let mut tokens = text.split_whitespace();
        let (old, new, name) = match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
            (Some(old), Some(new), Some(name), None) => (old, new, name),
            _ => {
                return Err(GitHttpError::BadRequest(format!(
                    "malformed push command {text:?}"
                )));
            }
        };
        let old = ObjectId::from_hex(old)
            .map_err(|_| GitHttpError::BadRequest(format!("bad old hash {old:?}")))?;
        let new = ObjectId::from_hex(new)
            .map_err(|_| GitHttpError::BadRequest(format!("bad new hash {new:?}")))?;
        commands.push(PushCommand {
            old,
            new,
            name: name.to_string(),
        });
    }
    Ok((commands, capabilities))
}

/// CAS precondition against the ref value observed under the lock.
fn precheck(current: Option<ObjectId>, command: &PushCommand) -> Option<String> {
    if !command.name.starts_with("refs/") {
        return Some("funny refname".into());
    }
    if command.is_create() && command.is_delete() {
        return Some("zero id on both sides".into());
    }
    if command.is_create() {
        if current.is_some() {
            return Some("already exists".into());
        }
        return None;
    }
    match current {
        None => Some("no such ref".into()),
        Some(value) if value == command.old => None,
        Some(_) => Some("fetch first".into()),
    }
}

pub async fn handle_receive_pack(
    state: &GitHttp,
    headers: HeaderMap,
    route: &str,
    body: Body,
) -> Response {
    if !state.options().enable_receive_pack {
        return GitHttpError::Forbidden("service is disabled".into()).into_response();
    }
    let (name, repo) = match state.resolve_repository(&headers, route) {
        Ok(resolved) => resolved,
        Err(err) => return err.into_response(),
    };
    if !state
        .options()
        .authorizer
        .authorize(&headers, &name, AccessMode::Write)
        .await
    {
        return GitHttpError::Forbidden("access denied".into()).into_response();
    }

    let bytes = match axum::body::to_bytes(body, state.options().max_request_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => return GitHttpError::BadRequest("invalid request body".into()).into_response(),
    };
    let (pkts, consumed) = match decode_pkt_section(&bytes) {
        Ok(section) => section,
        Err(err) => {
            return GitHttpError::BadRequest(format!("pkt parse error: {err}")).into_response();
        }
    };
    let (commands, capabilities) = match parse_commands(&pkts) {
        Ok(parsed) => parsed,
        Err(err) => return err.into_response(),
    };
    if commands.is_empty() {
        return result_response(Vec::new());
    }
    let report_status = capabilities.iter().any(|c| c == "report-status");
    let sideband = capabilities.iter().any(|c| c == "side-band-64k");

    // ordered multi-ref lock across everything the push touches
    let lock = repo
        .locks()
        .acquire_many(commands.iter().map(|c| c.name.clone()))
        .await;

    let mut decisions: Vec<Option<String>> = Vec::with_capacity(commands.len());
    for command in &commands {
        match repo.refs().current(&command.name) {
            Ok(current) => decisions.push(precheck(current, command)),
            Err(err) => {
                tracing::debug!("reading {} failed: {err}", command.name);
                decisions.push(Some("failed to read ref".into()));
            }
        }
    }

    // any update or create means the client sent a pack; read and verify it
    // even when every such command already failed its precheck, so the
    // unpack status in the report reflects the body that was actually sent
    let needs_pack = commands.iter().any(|command| !command.is_delete());

    let mut unpack_line = "unpack ok\n".to_string();
    if needs_pack {
        let pack_body = bytes.slice(consumed..);
        let unpack_repo = repo.clone();
        let unpacked = tokio::task::spawn_blocking(move || {
            pack::read_pack(unpack_repo.objects(), &pack_body[..])
        })
        .await;
        match unpacked {
            Ok(Ok(ids)) => {
                tracing::debug!("unpacked {} objects into {name}", ids.len());
            }
            Ok(Err(err)) => {
                unpack_line = format!("unpack {err}\n");
                for (command, decision) in commands.iter().zip(decisions.iter_mut()) {
                    if decision.is_none() && !command.is_delete() {
                        *decision = Some("unpacker error".into());
                    }
                }
            }
            Err(err) => {
                return GitHttpError::Internal(format!("unpack task failed: {err}"))
                    .into_response();
            }
        }
    }

    // fast-forward enforcement for surviving updates; creates only need the
    // new objects to exist, deletes only needed CAS
    let ff_repo = repo.clone();
    let ff_commands = commands.clone();
    let checked = tokio::task::spawn_blocking(move || {
        let mut verdicts: Vec<Option<String>> = vec![None; ff_commands.len()];
        for (index, command) in ff_commands.iter().enumerate() {
            if command.is_delete() {
                continue;
            }
            match ff_repo.objects().contains(&command.new) {
                Ok(true) => {}
                Ok(false) => {
                    verdicts[index] = Some("missing necessary objects".into());
                    continue;
                }
                Err(err) => {
                    verdicts[index] = Some(format!("failed to read objects: {err}"));
                    continue;
                }
            }
            if command.is_create() {
                continue;
            }
            match ff_repo.is_descendant(&command.new, &command.old) {
                Ok(true) => {}
                Ok(false) => verdicts[index] = Some("non-fast-forward".into()),
                Err(GitError::NotFound(_)) => {
                    verdicts[index] = Some("missing necessary objects".into());
                }
                Err(err) => verdicts[index] = Some(format!("history walk failed: {err}")),
            }
        }
        verdicts
    })
    .await;
    match checked {
        Ok(verdicts) => {
            for (decision, verdict) in decisions.iter_mut().zip(verdicts) {
                if decision.is_none() {
                    *decision = verdict;
                }
            }
        }
        Err(err) => {
            return GitHttpError::Internal(format!("fast-forward task failed: {err}"))
                .into_response();
        }
    }

    // apply what survived; each ref fails or succeeds on its own
    let mut updated = Vec::new();
    for (command, decision) in commands.iter().zip(decisions.iter_mut()) {
        if decision.is_some() {
            continue;
        }
        let expected = if command.is_create() {
            Expected::Absent
        } else {
            Expected::Value(command.old)
        };
        let new = (!command.is_delete()).then_some(command.new);
        match lock.write_with_validation(repo.refs(), &command.name, Some(expected), new) {
            Ok(()) => updated.push(RefUpdate {
                name: command.name.clone(),
                old: (!command.is_create()).then_some(command.old),
                new,
            }),
            Err(err) => {
                tracing::warn!("updating {} failed: {err}", command.name);
                *decision = Some("failed to update ref".into());
            }
        }
    }
    drop(lock);

    fire_completion_hook(state, name, updated);

    if !report_status {
        return result_response(Vec::new());
    }
    let mut report = Vec::new();
    report.extend_from_slice(&encode_pkt_line(unpack_line.as_bytes()));
    for (command, decision) in commands.iter().zip(&decisions) {
        let line = match decision {
            None => format!("ok {}\n", command.name),
            Some(reason) => format!("ng {} {}\n", command.name, reason),
        };
        report.extend_from_slice(&encode_pkt_line(line.as_bytes()));
    }
    report.extend_from_slice(PKT_FLUSH);

    let body = if sideband { sideband_wrap(&report) } else { report };
    result_response(body)
}

/// Detached notification; failures are logged and never reach the client.
fn fire_completion_hook(state: &GitHttp, repository: String, updated: Vec<RefUpdate>) {
    let Some(hook) = state.options().on_receive_pack_completed.clone() else {
        return;
    };
    tokio::spawn(async move {
        if let Err(err) = hook.on_receive_pack_completed(repository, updated).await {
            tracing::warn!("receive-pack completion hook failed: {err}");
        }
    });
}

fn result_response(body: Vec<u8>) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "application/x-git-receive-pack-result",
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(body))
        .expect("response build")
}
