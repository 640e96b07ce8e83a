#![allow(dead_code)]

use bytes::Bytes;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Method, Uri};
use kindle::middleware::SESSION_COOKIE;
use kindle::{Request, Response};

pub fn request(method: Method, path: &str) -> Request {
    let uri: Uri = path.parse().expect("test uri");
    Request::new(method, uri, HeaderMap::new(), Bytes::new())
}

pub fn get(path: &str) -> Request {
    request(Method::GET, path)
}

/// A GET carrying `kindleSession=<id>`.
pub fn get_with_session(path: &str, id: &str) -> Request {
    let mut headers = HeaderMap::new();
    let cookie = format!("theme=dark; {SESSION_COOKIE}={id}");
    headers.insert(COOKIE, HeaderValue::from_str(&cookie).expect("cookie header"));
    Request::new(Method::GET, path.parse().expect("test uri"), headers, Bytes::new())
}

pub fn body(res: &Response) -> &str {
    std::str::from_utf8(res.body()).expect("utf-8 body")
}

/// The session ID from the response's `Set-Cookie`, if one was issued.
pub fn issued_session(res: &Response) -> Option<String> {
    let value = res.headers().get(SET_COOKIE)?.to_str().ok()?;
    let rest = value.strip_prefix(&format!("{SESSION_COOKIE}="))?;
    Some(rest.split(';').next()?.to_owned())
}
