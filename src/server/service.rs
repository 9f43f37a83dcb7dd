//! HTTP service implementation - assembles the provider router and serves
//! it over plain HTTP or TLS.

use anyhow::{Context, bail};
use axum::Router;
use axum::routing::{any, get};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::fs;
use std::net::SocketAddr;
use tokio_rustls::TlsAcceptor;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::server::handlers::{
    invalid_token_handler, keyset_handler, launch_entry, login_handler, session_timeout_handler,
};
use crate::state::AppState;

/// Reserved routes first, then the launch entry catches everything else.
pub fn build_router(app: AppState) -> Router {
    let config = &app.0.config;
    let routes = &config.routes;

    let mut router = Router::new()
        .route(&routes.login, any(login_handler))
        .route(&routes.keyset, get(keyset_handler))
        .route(&routes.session_timeout, any(session_timeout_handler))
        .route(&routes.invalid_token, any(invalid_token_handler));

    // The app route is only worth registering when it does not collide with
    // another reserved path; the fallback covers it either way.
    let app_is_distinct = routes.app != routes.login
        && routes.app != routes.keyset
        && routes.app != routes.session_timeout
        && routes.app != routes.invalid_token;
    if app_is_distinct {
        router = router.route(&routes.app, any(launch_entry));
    }
    router = router.fallback(launch_entry);

    if let Some(static_path) = &config.static_path {
        router = router.nest_service("/static", ServeDir::new(static_path));
    }

    let mut router = router.with_state(app.clone());

    if config.cors {
        router = router.layer(cors_layer());
    }
    router.layer(TraceLayer::new_for_http())
}

fn cors_layer() -> CorsLayer {
    use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin};
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(AllowMethods::any())
        .allow_headers(AllowHeaders::any())
}

/// TLS certificate and key material.
struct TlsMaterial {
    certs: Vec<u8>,
    key: Vec<u8>,
}

fn is_existing_file(path: &str) -> bool {
    let path = std::path::Path::new(path);
    path.exists() && path.is_file()
}

/// Load the PEM files named in the ssl section. Setup already guaranteed
/// the section is present when https is on.
fn get_tls_key_material(app: &AppState) -> anyhow::Result<TlsMaterial> {
    let ssl = app
        .0
        .config
        .ssl
        .clone()
        .context("https enabled without an ssl section")?;
    let tls_key = ssl.key.unwrap_or_default();
    let tls_cert = ssl.cert.unwrap_or_default();

    if !is_existing_file(&tls_key) {
        bail!("TLS key file {} could not be found", tls_key);
    }
    if !is_existing_file(&tls_cert) {
        bail!("TLS cert file {} could not be found", tls_cert);
    }

    let certs = fs::read(&tls_cert).context(format!("Failed to read cert file {}", tls_cert))?;
    let key = fs::read(&tls_key).context(format!("Failed to read key file {}", tls_key))?;

    if certs.is_empty() || key.is_empty() {
        bail!("Key or cert is empty");
    }

    Ok(TlsMaterial { certs, key })
}

fn build_tls_acceptor(material: &TlsMaterial) -> anyhow::Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut material.certs.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to parse certificates")?;
    let key = rustls_pemfile::private_key(&mut material.key.as_slice())
        .context("Failed to parse private key")?
        .context("No private key found")?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Failed to build TLS config")?;
    Ok(TlsAcceptor::from(std::sync::Arc::new(config)))
}

/// Resolve a "host:port" string to a SocketAddr, allowing hostnames like
/// "localhost:3000".
fn resolve_bind_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    use std::net::ToSocketAddrs as _;
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("No address found for {}", addr))
}

/// Bind and serve until ctrl-c.
pub async fn serve(app: AppState) -> anyhow::Result<()> {
    let bind_address = app.0.config.bind_address.clone();
    let use_tls = app.0.config.https;
    let store = app.0.store.clone();
    let router = build_router(app.clone());

    let sock_addr = resolve_bind_addr(&bind_address)?;
    let listener = tokio::net::TcpListener::bind(sock_addr).await?;

    if use_tls {
        let material = get_tls_key_material(&app)?;
        let acceptor = build_tls_acceptor(&material)?;
        tracing::info!("Starting TLS server on https://{}", sock_addr);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let acceptor = acceptor.clone();
                    let service_router = router.clone();

                    tokio::spawn(async move {
                        let tls_stream = match acceptor.accept(stream).await {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("TLS accept failed: {}", e);
                                return;
                            }
                        };
                        let service = TowerToHyperService::new(service_router);
                        let _ = http1::Builder::new()
                            .serve_connection(TokioIo::new(tls_stream), service)
                            .await;
                    });
                }
            }
        }
    } else {
        tracing::info!("Starting plain HTTP server on http://{}", sock_addr);
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;
    }

    store.close().await.ok();
    Ok(())
}
