use super::{TLS_CA_CERT_NAME, TLS_CA_MOUNT_PATH, TLS_OPERATOR_SECRET_MOUNT_PATH};
use crate::automation_config::{ClientCertificateMode, Modification, MongoDbTls, Tls, TlsMode};

/// Path of the CA bundle inside every member container.
pub fn ca_file_path() -> String {
    format!("{TLS_CA_MOUNT_PATH}{TLS_CA_CERT_NAME}")
}

/// Path of the operator-managed certificate+key file inside every member container.
pub fn pem_key_file_path(operator_secret_file: &str) -> String {
    format!("{TLS_OPERATOR_SECRET_MOUNT_PATH}{operator_secret_file}")
}

/// Returns the modification that puts every process and the cluster-wide
/// settings into `mode`, referencing the material stored under `operator_secret_file`.
pub fn tls_modification(mode: TlsMode, operator_secret_file: &str) -> Modification {
    let ca_file = ca_file_path();
    let pem_key_file = pem_key_file_path(operator_secret_file);

    Box::new(move |mut config| {
        config.tls = Tls {
            ca_file_path: match mode {
                TlsMode::Disabled => String::new(),
                TlsMode::Preferred | TlsMode::Required => ca_file.clone(),
            },
            client_certificate_mode: ClientCertificateMode::Optional,
        };

        for process in config.processes.iter_mut() {
            process.args26.net.tls = match mode {
                TlsMode::Disabled => MongoDbTls::default(),
                TlsMode::Preferred | TlsMode::Required => MongoDbTls {
                    mode,
                    pem_key_file: pem_key_file.clone(),
                    ca_file: ca_file.clone(),
                    allow_connections_without_certificate: true,
                },
            };
        }

        config
    })
}
