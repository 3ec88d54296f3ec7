// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! The HTTP front end.
//!
//! A thin layer over [`UpdaterHandle`]: requests either read a snapshot or
//! enqueue a trigger and return immediately. A 200 on the POST routes means
//! the operation was legally queued, not that it completed.

use crate::runner::UpdaterHandle;
use anyhow::Error;
use hyper::server::Server;
use hyper::service::{make_service_fn, service_fn};
use hyper::{header, Body, Method, Request, Response, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// The on-board updater's HTTP server.
pub struct UpdaterServer;

impl UpdaterServer {
    /// Spawns the server on the current executor, returning the bound
    /// address (useful with a port-0 request) and the serve task.
    pub async fn start(
        handle: UpdaterHandle,
        addr: SocketAddr,
    ) -> Result<(SocketAddr, JoinHandle<()>), Error> {
        let make_svc = make_service_fn(move |_socket| {
            let handle = handle.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let handle = handle.clone();
                    async move { handle_request(req, &handle).await }
                }))
            }
        });

        let server = Server::try_bind(&addr)?.serve(make_svc);
        let addr = server.local_addr();

        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                error!("server error: {err}");
            }
        });

        Ok((addr, task))
    }
}

pub async fn handle_request(
    req: Request<Body>,
    handle: &UpdaterHandle,
) -> Result<Response<Body>, Error> {
    debug!("{} {}", req.method(), req.uri().path());

    match (req.method(), req.uri().path()) {
        (&Method::GET, "/version") => Ok(get_version(handle)),
        (&Method::GET, "/status") => get_status(handle),
        (&Method::POST, "/update") => post_update(req, handle).await,
        (&Method::POST, "/cancel") => {
            Ok(post_reply(handle.post_cancel(), "invalid state for cancel"))
        }
        (&Method::POST, "/revert") => {
            Ok(post_reply(handle.post_revert(), "invalid state for revert"))
        }
        (&Method::POST, "/bootstate") => post_boot_state(req, handle).await,
        // Unknown routes and methods both fall through to here.
        _ => Ok(error_response(StatusCode::INTERNAL_SERVER_ERROR, "bad route")),
    }
}

fn get_version(handle: &UpdaterHandle) -> Response<Body> {
    match handle.version() {
        // The version file is itself JSON; pass it through untouched.
        Some(version) => json_body(StatusCode::OK, version),
        None => error_response(StatusCode::INTERNAL_SERVER_ERROR, "no version found"),
    }
}

fn get_status(handle: &UpdaterHandle) -> Result<Response<Body>, Error> {
    let status = serde_json::to_string_pretty(&handle.status())?;
    Ok(json_body(StatusCode::OK, status))
}

async fn post_update(
    req: Request<Body>,
    handle: &UpdaterHandle,
) -> Result<Response<Body>, Error> {
    let image = hyper::body::to_bytes(req.into_body()).await?;
    if image.is_empty() {
        return Ok(error_response(StatusCode::BAD_REQUEST, "no data provided"));
    }

    Ok(post_reply(
        handle.post_update(image.to_vec()),
        "invalid state for update",
    ))
}

async fn post_boot_state(
    req: Request<Body>,
    handle: &UpdaterHandle,
) -> Result<Response<Body>, Error> {
    // An empty body clears the stored boot state.
    let body = hyper::body::to_bytes(req.into_body()).await?;
    handle.post_boot_state(String::from_utf8_lossy(&body).into_owned());
    Ok(success_response())
}

fn post_reply<E: std::fmt::Display>(result: Result<(), E>, rejection: &str) -> Response<Body> {
    match result {
        Ok(()) => success_response(),
        Err(err) => {
            debug!("rejecting request: {err}");
            error_response(StatusCode::FORBIDDEN, rejection)
        }
    }
}

fn success_response() -> Response<Body> {
    response_json(StatusCode::OK, &json!({ "response": "success" }))
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    response_json(status, &json!({ "response": message }))
}

fn response_json(status: StatusCode, value: &serde_json::Value) -> Response<Body> {
    // Pretty print in case someone is poking at the API with curl; all our
    // JSON is small enough that this doesn't hurt.
    let body = serde_json::to_string_pretty(value).unwrap_or_default();
    json_body(status, body)
}

fn json_body(status: StatusCode, body: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(body))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Config;
    use crate::process::SystemRunner;
    use crate::runner::StateRunner;
    use anyhow::Context;
    use hyper::Client;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::thread;
    use std::time::{Duration, Instant};

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config {
            update_write_path: dir.path().join("update.raucb"),
            version_path: dir.path().join("version.json"),
            update_cmds: sh("echo '50% Copying image'; echo 'Installing succeeded'"),
            override_cmds: sh("exit 0"),
            revert_cmds: sh("exit 0"),
            reboot_after_update: false,
            reboot_delay: Duration::ZERO,
            ..Config::default()
        }
    }

    async fn start_test_server(config: Config) -> Result<String, Error> {
        let (runner, handle) = StateRunner::new(config, SystemRunner);
        thread::spawn(move || runner.run());

        let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
        let (addr, _task) = UpdaterServer::start(handle, addr).await?;
        Ok(format!("http://{addr}"))
    }

    async fn get(url: String) -> Result<(StatusCode, serde_json::Value), Error> {
        let response = Client::new().get(url.parse()?).await?;
        let status = response.status();
        let body = hyper::body::to_bytes(response).await?;
        Ok((status, serde_json::from_slice(&body).context("parsing response json")?))
    }

    async fn post(url: String, body: Vec<u8>) -> Result<(StatusCode, serde_json::Value), Error> {
        let request = Request::post(url).body(Body::from(body))?;
        let response = Client::new().request(request).await?;
        let status = response.status();
        let body = hyper::body::to_bytes(response).await?;
        Ok((status, serde_json::from_slice(&body).context("parsing response json")?))
    }

    async fn wait_for_state(server: &str, state: &str) -> serde_json::Value {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let (code, status) = get(format!("{server}/status")).await.unwrap();
            assert_eq!(code, StatusCode::OK);
            if status["state"] == state {
                return status;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for state '{state}'; last {status}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_status_starts_ready() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let server = start_test_server(test_config(&dir)).await?;

        let (code, status) = get(format!("{server}/status")).await?;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(status["state"], "ready");
        assert_eq!(status["last_error"], serde_json::Value::Null);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_end_to_end_returns_to_ready_under_test_config() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let config = test_config(&dir);
        let image_path = config.update_write_path.clone();
        let server = start_test_server(config).await?;

        let image = b"new firmware".to_vec();
        let (code, body) = post(format!("{server}/update"), image.clone()).await?;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["response"], "success");

        // With the mock installer exiting 0, the service walks through the
        // install to the reboot state and, in test mode, back to ready.
        // Observing the install first distinguishes the finished run from
        // the initial ready state.
        wait_for_state(&server, "installing_update").await;
        let status = wait_for_state(&server, "ready").await;
        assert_eq!(status["rauc_state"], "success");
        assert_eq!(fs::read(image_path)?, image);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_while_installing_is_rejected() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let config = Config {
            // Keep the install running long enough to observe it.
            update_cmds: sh("sleep 2; echo 'Installing succeeded'"),
            ..test_config(&dir)
        };
        let server = start_test_server(config).await?;

        let (code, _) = post(format!("{server}/update"), b"image".to_vec()).await?;
        assert_eq!(code, StatusCode::OK);
        wait_for_state(&server, "installing_update").await;

        let (code, body) = post(format!("{server}/update"), b"another".to_vec()).await?;
        assert_eq!(code, StatusCode::FORBIDDEN);
        assert_eq!(body["response"], "invalid state for update");

        let (_, status) = get(format!("{server}/status")).await?;
        assert_eq!(status["state"], "installing_update");
        Ok(())
    }

    #[tokio::test]
    async fn test_update_with_empty_body_is_a_bad_request() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let server = start_test_server(test_config(&dir)).await?;

        let (code, body) = post(format!("{server}/update"), Vec::new()).await?;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["response"], "no data provided");
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_and_revert_are_rejected_when_ready_or_not() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let server = start_test_server(test_config(&dir)).await?;

        let (code, body) = post(format!("{server}/cancel"), Vec::new()).await?;
        assert_eq!(code, StatusCode::FORBIDDEN);
        assert_eq!(body["response"], "invalid state for cancel");

        // Revert is legal from ready and runs through reboot back to ready.
        let (code, body) = post(format!("{server}/revert"), Vec::new()).await?;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["response"], "success");
        wait_for_state(&server, "ready").await;
        Ok(())
    }

    #[tokio::test]
    async fn test_bootstate_is_stored_verbatim_and_cleared_by_empty_body() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let server = start_test_server(test_config(&dir)).await?;

        let (code, _) = post(format!("{server}/bootstate"), b"slot A healthy".to_vec()).await?;
        assert_eq!(code, StatusCode::OK);
        let (_, status) = get(format!("{server}/status")).await?;
        assert_eq!(status["boot_state"], "slot A healthy");

        let (code, _) = post(format!("{server}/bootstate"), Vec::new()).await?;
        assert_eq!(code, StatusCode::OK);
        let (_, status) = get(format!("{server}/status")).await?;
        assert_eq!(status["boot_state"], "");
        Ok(())
    }

    #[tokio::test]
    async fn test_version_file_is_served_raw() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let config = test_config(&dir);
        fs::write(&config.version_path, "{\"version\": \"2.4.1\"}")?;
        let server = start_test_server(config).await?;

        // The version is read by the runner thread at startup.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let response = Client::new().get(format!("{server}/version").parse()?).await?;
            let code = response.status();
            let body = hyper::body::to_bytes(response).await?;
            if code == StatusCode::OK {
                assert_eq!(&body[..], b"{\"version\": \"2.4.1\"}");
                return Ok(());
            }
            assert!(Instant::now() < deadline, "version never became available");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_missing_version_file_is_an_error() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let server = start_test_server(test_config(&dir)).await?;
        // Give the runner a moment to attempt (and fail) the startup read.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (code, body) = get(format!("{server}/version")).await?;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["response"], "no version found");
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_routes_and_methods_are_bad_routes() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let server = start_test_server(test_config(&dir)).await?;

        let (code, body) = get(format!("{server}/nope")).await?;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["response"], "bad route");

        // A known path with the wrong method falls through too.
        let (code, body) = post(format!("{server}/status"), Vec::new()).await?;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["response"], "bad route");
        Ok(())
    }
}
