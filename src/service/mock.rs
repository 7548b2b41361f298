//! In-process stand-in for the model service's HTTP surface

use std::io::Read;
use std::net::TcpListener;
use std::thread;
use tiny_http::{Header, Response, Server};

/// Serves every request through a handler on a background thread.
///
/// The handler gets method, path and request body and returns the status
/// code and body to answer with. The thread lives until the test process
/// exits.
pub(crate) struct MockService {
    pub url: String,
}

impl MockService {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &str, &str) -> (u16, String) + Send + 'static,
    {
        let server = Server::http("127.0.0.1:0").expect("bind mock service");
        let addr = server
            .server_addr()
            .to_ip()
            .expect("mock service listens on tcp");

        thread::spawn(move || {
            for mut request in server.incoming_requests() {
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let method = request.method().to_string();
                let path = request.url().to_string();

                let (code, payload) = handler(&method, &path, &body);
                let mut response = Response::from_string(payload).with_status_code(code);
                if let Ok(header) = Header::from_bytes("Content-Type", "application/json") {
                    response = response.with_header(header);
                }
                let _ = request.respond(response);
            }
        });

        Self {
            url: format!("http://{}", addr),
        }
    }

    /// URL of a port nothing listens on
    pub fn closed_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe port");
        let addr = listener.local_addr().expect("probe port address");
        drop(listener);
        format!("http://{}", addr)
    }
}
