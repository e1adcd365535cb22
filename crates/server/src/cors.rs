use rocket::{
    Request, Response,
    fairing::{Fairing, Info, Kind},
    http::{Header, Method, Status},
};

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const DEFAULT_ALLOWED_HEADERS: &str = "Content-Type";

/// Permissive CORS: any origin may call the OCR endpoints from a browser.
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS headers",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let requested = req
            .headers()
            .get_one("Access-Control-Request-Headers")
            .unwrap_or(DEFAULT_ALLOWED_HEADERS);
        res.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        res.set_header(Header::new("Access-Control-Allow-Methods", ALLOWED_METHODS));
        res.set_header(Header::new("Access-Control-Allow-Headers", requested.to_string()));

        // preflight requests have no route of their own
        if req.method() == Method::Options && res.status() == Status::NotFound {
            res.set_status(Status::NoContent);
        }
    }
}
