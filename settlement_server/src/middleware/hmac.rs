//! HMAC middleware for Actix Web.
//!
//! Payment gateways and carriers sign each webhook body with a shared secret (`SETTLE_WEBHOOK_HMAC_SECRET`), and put
//! the base64-encoded HMAC-SHA256 of the body in a request header. This middleware recomputes the signature over the
//! raw body and rejects the call if the two differ, before the body is deserialized.
//!
//! Wrap every webhook scope with [`HmacMiddlewareFactory`].

use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_http::h1;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    error::{ErrorBadRequest, ErrorForbidden},
    web,
    Error,
};
use futures::future::LocalBoxFuture;
use log::{error, trace, warn};
use settlement_common::Secret;

use crate::helpers::verify_hmac;

/// The header webhook senders put the body signature in.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "X-Settlement-Hmac-Sha256";

pub struct HmacMiddlewareFactory {
    hmac_header: String,
    key: Secret<String>,
    // If false, then the middleware will not check the HMAC signature and always allow the call
    enabled: bool,
}

impl HmacMiddlewareFactory {
    pub fn new(hmac_header: &str, key: Secret<String>, enabled: bool) -> Self {
        HmacMiddlewareFactory { hmac_header: hmac_header.into(), key, enabled }
    }
}

impl<S, B> Transform<S, ServiceRequest> for HmacMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = HmacMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(HmacMiddlewareService {
            hmac_header: self.hmac_header.clone(),
            key: self.key.clone(),
            enabled: self.enabled,
            service: Rc::new(service),
        }))
    }
}

pub struct HmacMiddlewareService<S> {
    hmac_header: String,
    key: Secret<String>,
    enabled: bool,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for HmacMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let secret = self.key.clone();
        let hmac_header = self.hmac_header.clone();
        let enabled = self.enabled;
        Box::pin(async move {
            if !enabled {
                trace!("🔐️ HMAC checks are disabled. Allowing {}", req.path());
                return service.call(req).await;
            }
            if secret.is_empty() {
                error!("🔐️ No webhook secret is configured, so {} cannot be verified. Denying access.", req.path());
                return Err(ErrorForbidden("Webhook signatures cannot be verified."));
            }
            let signature = req
                .headers()
                .get(&hmac_header)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .ok_or_else(|| {
                    warn!("🔐️ No HMAC signature found in request to {}. Denying access.", req.path());
                    ErrorForbidden("No HMAC signature found.")
                })?;
            let data = req.extract::<web::Bytes>().await.map_err(|e| {
                warn!("🔐️ Failed to extract request data: {e:?}");
                ErrorBadRequest("Failed to extract request data.")
            })?;
            if verify_hmac(secret.reveal(), data.as_ref(), &signature) {
                trace!("🔐️ HMAC check for {} ✅️", req.path());
                req.set_payload(bytes_to_payload(data));
                service.call(req).await
            } else {
                warn!("🔐️ Invalid HMAC signature found in request to {}. Denying access.", req.path());
                Err(ErrorForbidden("Invalid HMAC signature."))
            }
        })
    }
}

// The body was consumed to check the signature, so hand a copy back to the handler
fn bytes_to_payload(buf: web::Bytes) -> Payload {
    let (_, mut pl) = h1::Payload::create(true);
    pl.unread_data(buf);
    Payload::from(pl)
}

#[cfg(test)]
mod test {
    use actix_web::{http::StatusCode, test, web, App, HttpResponse};

    use super::*;
    use crate::helpers::calculate_hmac;

    const SECRET: &str = "webhook-secret";

    async fn echo(body: web::Bytes) -> HttpResponse {
        HttpResponse::Ok().body(body)
    }

    async fn call(enabled: bool, secret: &str, signature: Option<String>, body: &'static str) -> (StatusCode, String) {
        let app = App::new().service(
            web::scope("/webhook")
                .wrap(HmacMiddlewareFactory::new(WEBHOOK_SIGNATURE_HEADER, Secret::new(secret.to_string()), enabled))
                .route("/capture", web::post().to(echo)),
        );
        let service = test::init_service(app).await;
        let mut req = test::TestRequest::post().uri("/webhook/capture").set_payload(body);
        if let Some(signature) = signature {
            req = req.insert_header((WEBHOOK_SIGNATURE_HEADER, signature));
        }
        match test::try_call_service(&service, req.to_request()).await {
            Ok(res) => {
                let status = res.status();
                let body = test::read_body(res).await;
                (status, String::from_utf8_lossy(&body).into_owned())
            },
            Err(e) => (e.as_response_error().status_code(), e.to_string()),
        }
    }

    #[actix_web::test]
    async fn valid_signature_passes_body_through() {
        let body = r#"{"order_id":"ord-1"}"#;
        let (status, echoed) = call(true, SECRET, Some(calculate_hmac(SECRET, body.as_bytes())), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(echoed, body);
    }

    #[actix_web::test]
    async fn bad_or_missing_signatures_are_refused() {
        let body = r#"{"order_id":"ord-1"}"#;
        let (status, _) = call(true, SECRET, Some(calculate_hmac("other", body.as_bytes())), body).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, msg) = call(true, SECRET, None, body).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(msg, "No HMAC signature found.");
        let (status, _) = call(true, "", Some(calculate_hmac("", body.as_bytes())), body).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn disabled_checks_allow_everything() {
        let (status, echoed) = call(false, SECRET, None, "hello").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(echoed, "hello");
    }
}
