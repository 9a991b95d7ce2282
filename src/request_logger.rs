use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request, Response};
use std::time::{Duration, Instant};

/// Requests slower than this are logged at warn level. Bundle exports that
/// dump a large repository are the usual offenders.
const SLOW_REQUEST: Duration = Duration::from_secs(5);

/// Fairing to log one line per HTTP request with timing
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(Instant::now);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let duration = request.local_cache(Instant::now).elapsed();
        let millis = duration.as_secs_f64() * 1000.0;

        let method = request.method();
        let uri = request.uri();
        let status = response.status();

        if duration >= SLOW_REQUEST {
            log::warn!("{} {} -> {} ({:.2}ms, slow)", method, uri, status.code, millis);
        } else if status.code >= 500 {
            log::warn!("{} {} -> {} ({:.2}ms)", method, uri, status.code, millis);
        } else {
            log::info!("{} {} -> {} ({:.2}ms)", method, uri, status.code, millis);
        }
    }
}
