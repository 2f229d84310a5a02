mod http;

pub mod runner;

pub use http::{Error as HttpError, HttpClient, HttpRequest, HttpResponse, Transport};
