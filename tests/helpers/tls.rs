use boring::pkey::PKey;
use boring::ssl::{AlpnError, SslAcceptor, SslAcceptorBuilder, SslMethod};
use boring::x509::X509;
use std::sync::{Arc, Mutex};

/// Generate a self-signed certificate for 127.0.0.1 and return SslAcceptorBuilder + CA cert bytes.
pub fn generate_cert_bundle() -> (SslAcceptorBuilder, Vec<u8>) {
    let subject_alt_names = vec!["127.0.0.1".to_string(), "localhost".to_string()];

    let cert =
        rcgen::generate_simple_self_signed(subject_alt_names).expect("Failed to generate cert");
    let cert_pem = cert.cert.pem();
    let key_pem = cert.signing_key.serialize_pem();

    let pkey = PKey::private_key_from_pem(key_pem.as_bytes()).expect("Failed to parse private key");
    let x509 = X509::from_pem(cert_pem.as_bytes()).expect("Failed to parse certificate");

    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())
        .expect("Failed to create SslAcceptor builder");
    builder
        .set_private_key(&pkey)
        .expect("Failed to set private key");
    builder
        .set_certificate(&x509)
        .expect("Failed to set certificate");

    // Self-signed, so the leaf doubles as the CA.
    (builder, cert_pem.into_bytes())
}

/// TLS server side of a test: acceptor, the CA the client must trust, and
/// every ALPN list a client offered (raw wire format).
pub struct TlsFixture {
    pub acceptor: SslAcceptor,
    pub ca_cert: Vec<u8>,
    pub alpn_offers: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl TlsFixture {
    /// `server_protos` is the server's preference list in ALPN wire format.
    /// `None` leaves ALPN unhandled, so the server never selects a protocol.
    pub fn new(server_protos: Option<&'static [u8]>) -> Self {
        let (mut builder, ca_cert) = generate_cert_bundle();
        let alpn_offers = Arc::new(Mutex::new(Vec::new()));

        if let Some(server_protos) = server_protos {
            let offers = Arc::clone(&alpn_offers);
            builder.set_alpn_select_callback(move |_, client_protos| {
                offers.lock().unwrap().push(client_protos.to_vec());
                boring::ssl::select_next_proto(server_protos, client_protos).ok_or(AlpnError::NOACK)
            });
        }

        Self {
            acceptor: builder.build(),
            ca_cert,
            alpn_offers,
        }
    }

    pub fn offers(&self) -> Vec<Vec<u8>> {
        self.alpn_offers.lock().unwrap().clone()
    }
}
