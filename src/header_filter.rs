//! Decoder filters applying a vhost's header rewrite/forwarding policy to a
//! request before it's serialized for the origin.
//!
//! Grounds the decoder side of the filter chain in something concrete: the
//! router picks a vhost and its [`crate::config::HeaderPolicy`], and this
//! filter is what actually mutates the [`RequestContext`] headers/target
//! according to it, the way the router's own filter sits last in a vhost's
//! decoder chain.

use crate::config::HeaderPolicy;
use crate::filter_chain::{DecoderFilter, FilterStatus};
use crate::request::RequestContext;

const SSL_HEADER_NAMES: &[&str] = &[
    "x-ssl-client-verify",
    "x-ssl-client-cert",
    "x-ssl-cipher",
    "x-ssl-protocol",
];

/// Applies `X-Forwarded-For`, `X-SSL-*`, x509-extension, strip-headers, and
/// rewrite-urls policy to a request before handing it to the upstream codec
/// filter.
pub struct HeaderRewriteFilter {
    policy: HeaderPolicy,
}

impl HeaderRewriteFilter {
    /// Builds a filter applying `policy` to every request it sees.
    pub fn new(policy: HeaderPolicy) -> Self {
        HeaderRewriteFilter { policy }
    }
}

impl DecoderFilter for HeaderRewriteFilter {
    fn decode_headers(&mut self, ctx: &mut RequestContext) -> FilterStatus {
        if self.policy.set_x_forwarded_for {
            if let Some(addr) = ctx.client_addr {
                ctx.strip_header("x-forwarded-for");
                ctx.add_header("X-Forwarded-For", addr.ip().to_string().as_bytes());
            }
        }

        for name in SSL_HEADER_NAMES {
            ctx.strip_header(name);
        }
        if self.policy.set_ssl_headers {
            if let Some(ssl) = ctx.ssl_info.clone() {
                ctx.add_header("X-SSL-Client-Verify", b"SUCCESS");
                if let Some(cipher) = ssl.cipher_suite.as_ref() {
                    ctx.add_header("X-SSL-Cipher", cipher.as_bytes());
                }
                if let Some(proto) = ssl.protocol_version.as_ref() {
                    ctx.add_header("X-SSL-Protocol", proto.as_bytes());
                }

                for ext in &self.policy.x509_extensions {
                    if let Some(value) = ssl.extensions_by_oid.get(&ext.oid) {
                        ctx.add_header(&ext.name, value);
                    }
                }
            }
        }

        for name in &self.policy.strip_headers {
            ctx.strip_header(name);
        }

        if let Some(target) = ctx.target.clone() {
            for (from, to) in &self.policy.rewrite_urls {
                if let Some(rest) = target.strip_prefix(from.as_str()) {
                    ctx.target = Some(format!("{to}{rest}"));
                    break;
                }
            }
        }

        FilterStatus::Continue
    }
}

/// Marker decoder filter standing in for the router's own upstream codec
/// filter: always last in the decoder chain, handing the (by now rewritten)
/// request off to be serialized for the origin.
pub struct UpstreamCodecFilter;

impl DecoderFilter for UpstreamCodecFilter {
    fn decode_headers(&mut self, _ctx: &mut RequestContext) -> FilterStatus {
        FilterStatus::Continue
    }
}
