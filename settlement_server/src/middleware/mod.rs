mod hmac;

pub use hmac::{HmacMiddlewareFactory, HmacMiddlewareService, WEBHOOK_SIGNATURE_HEADER};
