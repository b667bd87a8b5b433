//! HTTPS client used by the remote decision engine.

use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use webpki_roots::TLS_SERVER_ROOTS;

use crate::decision::DecisionResult;

pub(crate) type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

#[allow(clippy::unnecessary_wraps)]
pub(crate) fn build_https_client() -> DecisionResult<HyperClient> {
    let anchors: Vec<OwnedTrustAnchor> = TLS_SERVER_ROOTS
        .iter()
        .map(|root| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                root.subject,
                root.spki,
                root.name_constraints,
            )
        })
        .collect();
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(anchors.into_iter());

    let tls = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    // Plain HTTP stays allowed so a local model endpoint can be used as a
    // base-url override.
    let connector = HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .build();

    Ok(Client::builder().build::<_, Body>(connector))
}
