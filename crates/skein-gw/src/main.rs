use skein_core::buffers::{self, OsSocketInspector, RECOMMENDED_BUFFER_BYTES};
use skein_core::config;
use std::env;
use std::net::UdpSocket;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (cfg, path) = match config::load_config() {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("{}", err);
            std::process::exit(1);
        }
    };
    if let Err(err) = cfg.validate() {
        error!("config validation failed ({}): {}", path.display(), err);
        std::process::exit(1);
    }
    info!("configuration loaded from {}", path.display());

    // An unresolvable listen address is the one fatal startup error: nothing
    // can be prepared without an endpoint.
    let listen_addr = match cfg.listen_addr() {
        Ok(addr) => addr,
        Err(err) => {
            error!("{}", err);
            std::process::exit(1);
        }
    };

    let socket = match UdpSocket::bind(listen_addr) {
        Ok(socket) => socket,
        Err(err) => {
            error!("failed to bind udp {}: {}", listen_addr, err);
            std::process::exit(1);
        }
    };
    info!("bound udp {}", listen_addr);

    let negotiation = buffers::tune_udp_buffers(
        &socket,
        &OsSocketInspector,
        RECOMMENDED_BUFFER_BYTES,
        RECOMMENDED_BUFFER_BYTES,
    );
    negotiation.report();

    // The QUIC engine consumes the tuned socket; the gateway process keeps
    // it bound and answers health probes meanwhile.
    let health_listen = env::var("SKEIN_GW_HEALTH").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let server = Server::http(&health_listen).unwrap_or_else(|e| {
        error!("failed to start health endpoint on {}: {}", health_listen, e);
        std::process::exit(1);
    });
    info!("health endpoint listening on {}", health_listen);

    let body = format!(
        "{{\"status\":\"ok\",\"listen\":\"{}\",\"recv_buffer\":{},\"send_buffer\":{}}}\n",
        listen_addr,
        negotiation.read.granted_bytes().unwrap_or(0),
        negotiation.write.granted_bytes().unwrap_or(0)
    );

    for request in server.incoming_requests() {
        if request.method() == &Method::Get && request.url() == "/healthz" {
            let mut response = Response::from_string(body.clone());
            response.add_header(
                Header::from_bytes("content-type", "application/json").expect("header"),
            );
            response.add_header(Header::from_bytes("cache-control", "no-store").expect("header"));
            let _ = request.respond(response.with_status_code(StatusCode(200)));
            continue;
        }

        let response = Response::from_string("not found\n").with_status_code(StatusCode(404));
        let _ = request.respond(response);
    }
}
