/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

//! Selects and validates the credential profile of a cluster. Nothing here
//! touches the network or the file system; handshakes belong to the client.

use crate::configs::{GssapiConfig, KafkaConfig, TlsConfig};
use crate::error::AuthError;
use std::fmt::{Debug, Display, Formatter};
use strum::Display as StrumDisplay;

const DEFAULT_KERBEROS_SERVICE: &str = "kafka";

/// Secret value whose `Debug` output only shows a short preview.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", redact(&self.0))
    }
}

pub fn redact(value: &str) -> String {
    let preview: String = value.chars().take(3).collect();
    format!("{preview}***")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum ScramAlgorithm {
    #[strum(to_string = "SCRAM-SHA-256")]
    Sha256,
    #[strum(to_string = "SCRAM-SHA-512")]
    Sha512,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GssapiAuth {
    Password { username: String, password: Secret },
    Keytab { keytab_path: String, principal: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GssapiProfile {
    pub auth: GssapiAuth,
    pub service_name: String,
    pub realm: Option<String>,
    pub kerberos_config_path: Option<String>,
    pub disable_pafxfast: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthProfile {
    None,
    Plain {
        username: String,
        password: Secret,
    },
    Scram {
        algorithm: ScramAlgorithm,
        username: String,
        password: Secret,
    },
    Gssapi(GssapiProfile),
}

impl Display for AuthProfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthProfile::None => write!(f, "none"),
            AuthProfile::Plain { .. } => write!(f, "PLAIN"),
            AuthProfile::Scram { algorithm, .. } => write!(f, "{algorithm}"),
            AuthProfile::Gssapi(profile) => match profile.auth {
                GssapiAuth::Password { .. } => write!(f, "GSSAPI (password)"),
                GssapiAuth::Keytab { .. } => write!(f, "GSSAPI (keytab)"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsProfile {
    pub ca_cert_file: Option<String>,
    /// Certificate and key paths.
    pub client_identity: Option<(String, String)>,
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialProfile {
    pub sasl: AuthProfile,
    pub tls: Option<TlsProfile>,
}

impl Display for CredentialProfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.tls {
            Some(tls) if tls.insecure_skip_verify => write!(f, "{} + TLS (unverified)", self.sasl),
            Some(_) => write!(f, "{} + TLS", self.sasl),
            None => write!(f, "{}", self.sasl),
        }
    }
}

pub fn build(cluster: &KafkaConfig) -> Result<CredentialProfile, AuthError> {
    let tls = if cluster.tls.enable {
        Some(build_tls(&cluster.name, &cluster.tls)?)
    } else {
        None
    };
    Ok(CredentialProfile {
        sasl: build_sasl(cluster)?,
        tls,
    })
}

fn build_sasl(cluster: &KafkaConfig) -> Result<AuthProfile, AuthError> {
    let sasl = &cluster.sasl;
    if !sasl.enable {
        return Ok(AuthProfile::None);
    }
    let name = &cluster.name;
    let mechanism = sasl.mechanism.trim();
    match mechanism.to_ascii_uppercase().as_str() {
        "" => Err(AuthError::MissingMechanism {
            cluster: name.clone(),
        }),
        "PLAIN" => {
            let (username, password) =
                user_and_password(name, "PLAIN", &sasl.username, &sasl.password)?;
            Ok(AuthProfile::Plain { username, password })
        }
        "SCRAM-SHA-256" => {
            let (username, password) =
                user_and_password(name, "SCRAM-SHA-256", &sasl.username, &sasl.password)?;
            Ok(AuthProfile::Scram {
                algorithm: ScramAlgorithm::Sha256,
                username,
                password,
            })
        }
        "SCRAM-SHA-512" => {
            let (username, password) =
                user_and_password(name, "SCRAM-SHA-512", &sasl.username, &sasl.password)?;
            Ok(AuthProfile::Scram {
                algorithm: ScramAlgorithm::Sha512,
                username,
                password,
            })
        }
        "GSSAPI" => build_gssapi(name, &sasl.gssapi).map(AuthProfile::Gssapi),
        _ => Err(AuthError::UnknownMechanism {
            cluster: name.clone(),
            mechanism: mechanism.to_owned(),
        }),
    }
}

fn build_gssapi(cluster: &str, config: &GssapiConfig) -> Result<GssapiProfile, AuthError> {
    let use_keytab = match config.auth_type {
        0 => !config.key_tab_path.trim().is_empty(),
        1 => false,
        2 => true,
        auth_type => {
            return Err(AuthError::UnknownGssapiAuthType {
                cluster: cluster.to_owned(),
                auth_type,
            });
        }
    };

    let realm = non_blank(&config.realm);
    let auth = if use_keytab {
        if config.key_tab_path.trim().is_empty() {
            return Err(missing(cluster, "GSSAPI", "KeyTabPath"));
        }
        check_path(cluster, "KeyTabPath", &config.key_tab_path)?;
        let principal =
            non_blank(&config.username).ok_or_else(|| missing(cluster, "GSSAPI", "Username"))?;
        if realm.is_none() {
            return Err(missing(cluster, "GSSAPI", "Realm"));
        }
        GssapiAuth::Keytab {
            keytab_path: config.key_tab_path.clone(),
            principal,
        }
    } else {
        let (username, password) =
            user_and_password(cluster, "GSSAPI", &config.username, &config.password)?;
        GssapiAuth::Password { username, password }
    };

    let kerberos_config_path = non_blank(&config.kerberos_config_path);
    if let Some(path) = &kerberos_config_path {
        check_path(cluster, "KerberosConfigPath", path)?;
    }

    Ok(GssapiProfile {
        auth,
        service_name: non_blank(&config.service_name)
            .unwrap_or_else(|| DEFAULT_KERBEROS_SERVICE.to_owned()),
        realm,
        kerberos_config_path,
        disable_pafxfast: config.disable_pafxfast,
    })
}

fn build_tls(cluster: &str, config: &TlsConfig) -> Result<TlsProfile, AuthError> {
    let ca_cert_file = non_blank(&config.ca_cert_files);
    if let Some(path) = &ca_cert_file {
        check_path(cluster, "CaCertFiles", path)?;
    }

    let client_identity = match (
        non_blank(&config.client_cert_file),
        non_blank(&config.client_key_file),
    ) {
        (None, None) => None,
        (Some(cert), Some(key)) => {
            check_path(cluster, "ClientCertFile", &cert)?;
            check_path(cluster, "ClientKeyFile", &key)?;
            Some((cert, key))
        }
        _ => {
            return Err(AuthError::IncompleteClientCertificate {
                cluster: cluster.to_owned(),
            });
        }
    };

    Ok(TlsProfile {
        ca_cert_file,
        client_identity,
        insecure_skip_verify: config.insecure_skip_verify,
    })
}

fn user_and_password(
    cluster: &str,
    mechanism: &'static str,
    username: &str,
    password: &str,
) -> Result<(String, Secret), AuthError> {
    let username = non_blank(username).ok_or_else(|| missing(cluster, mechanism, "Username"))?;
    if password.is_empty() {
        return Err(missing(cluster, mechanism, "Password"));
    }
    Ok((username, Secret::new(password)))
}

/// Syntax only: non-blank, no NUL byte, not a directory.
fn check_path(cluster: &str, field: &'static str, path: &str) -> Result<(), AuthError> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed.contains('\0') || trimmed.ends_with('/') {
        return Err(AuthError::MalformedPath {
            cluster: cluster.to_owned(),
            field,
            path: path.to_owned(),
        });
    }
    Ok(())
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

fn missing(cluster: &str, mechanism: &'static str, field: &'static str) -> AuthError {
    AuthError::MissingCredentials {
        cluster: cluster.to_owned(),
        mechanism,
        missing: field,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::SaslConfig;
    use test_case::test_case;

    fn cluster(sasl: SaslConfig) -> KafkaConfig {
        KafkaConfig {
            name: "kfk".to_owned(),
            brokers: "127.0.0.1:9092".to_owned(),
            sasl,
            ..Default::default()
        }
    }

    fn sasl(mechanism: &str, username: &str, password: &str) -> SaslConfig {
        SaslConfig {
            enable: true,
            mechanism: mechanism.to_owned(),
            username: username.to_owned(),
            password: password.to_owned(),
            ..Default::default()
        }
    }

    fn keytab_gssapi() -> GssapiConfig {
        GssapiConfig {
            auth_type: 2,
            key_tab_path: "/etc/security/mmmtest.keytab".to_owned(),
            kerberos_config_path: "/etc/krb5.conf".to_owned(),
            service_name: String::new(),
            username: "mmm123".to_owned(),
            realm: "ALANWANG.COM".to_owned(),
            disable_pafxfast: true,
            ..Default::default()
        }
    }

    #[test]
    fn disabled_sasl_should_yield_none_even_with_leftover_fields() {
        let mut config = sasl("PLAIN", "", "");
        config.enable = false;

        let profile = build(&cluster(config)).unwrap();

        assert_eq!(profile.sasl, AuthProfile::None);
        assert!(profile.tls.is_none());
    }

    #[test]
    fn plain_should_carry_credentials() {
        let profile = build(&cluster(sasl("PLAIN", "alice", "alice-secret"))).unwrap();

        assert_eq!(
            profile.sasl,
            AuthProfile::Plain {
                username: "alice".to_owned(),
                password: Secret::new("alice-secret"),
            }
        );
    }

    #[test_case("SCRAM-SHA-256", ScramAlgorithm::Sha256; "sha256")]
    #[test_case("scram-sha-512", ScramAlgorithm::Sha512; "sha512 lowercase")]
    fn scram_should_select_algorithm(mechanism: &str, expected: ScramAlgorithm) {
        let profile = build(&cluster(sasl(mechanism, "bob", "pw"))).unwrap();

        assert!(matches!(
            profile.sasl,
            AuthProfile::Scram { algorithm, .. } if algorithm == expected
        ));
    }

    #[test_case("PLAIN", "", "pw", "Username"; "plain without user")]
    #[test_case("PLAIN", "alice", "", "Password"; "plain without password")]
    #[test_case("SCRAM-SHA-256", "  ", "pw", "Username"; "scram with blank user")]
    fn missing_credentials_should_fail(mechanism: &str, user: &str, pass: &str, field: &str) {
        let result = build(&cluster(sasl(mechanism, user, pass)));

        assert!(matches!(
            result,
            Err(AuthError::MissingCredentials { missing, .. }) if missing == field
        ));
    }

    #[test]
    fn enabled_sasl_without_mechanism_should_fail_closed() {
        let result = build(&cluster(sasl("", "alice", "pw")));
        assert!(matches!(result, Err(AuthError::MissingMechanism { .. })));
    }

    #[test]
    fn unknown_mechanism_should_fail() {
        let result = build(&cluster(sasl("OAUTHBEARER", "alice", "pw")));
        assert!(matches!(
            result,
            Err(AuthError::UnknownMechanism { mechanism, .. }) if mechanism == "OAUTHBEARER"
        ));
    }

    #[test]
    fn gssapi_keytab_should_default_service_name() {
        let mut config = sasl("GSSAPI", "", "");
        config.gssapi = keytab_gssapi();

        let profile = build(&cluster(config)).unwrap();

        let AuthProfile::Gssapi(gssapi) = profile.sasl else {
            panic!("expected GSSAPI profile");
        };
        assert_eq!(gssapi.service_name, "kafka");
        assert_eq!(gssapi.realm.as_deref(), Some("ALANWANG.COM"));
        assert_eq!(
            gssapi.auth,
            GssapiAuth::Keytab {
                keytab_path: "/etc/security/mmmtest.keytab".to_owned(),
                principal: "mmm123".to_owned(),
            }
        );
        assert!(gssapi.disable_pafxfast);
    }

    #[test_case(0, "/etc/a.keytab", true; "inferred keytab")]
    #[test_case(0, "", false; "inferred password")]
    #[test_case(1, "/etc/a.keytab", false; "explicit password")]
    fn gssapi_auth_type_should_select_mode(auth_type: u8, keytab: &str, expect_keytab: bool) {
        let mut config = sasl("GSSAPI", "", "");
        config.gssapi = GssapiConfig {
            auth_type,
            key_tab_path: keytab.to_owned(),
            username: "svc".to_owned(),
            password: "pw".to_owned(),
            realm: "EXAMPLE.COM".to_owned(),
            ..Default::default()
        };

        let AuthProfile::Gssapi(gssapi) = build(&cluster(config)).unwrap().sasl else {
            panic!("expected GSSAPI profile");
        };
        assert_eq!(
            matches!(gssapi.auth, GssapiAuth::Keytab { .. }),
            expect_keytab
        );
    }

    #[test]
    fn gssapi_keytab_without_realm_should_fail() {
        let mut config = sasl("GSSAPI", "", "");
        config.gssapi = keytab_gssapi();
        config.gssapi.realm.clear();

        let result = build(&cluster(config));
        assert!(matches!(
            result,
            Err(AuthError::MissingCredentials { missing: "Realm", .. })
        ));
    }

    #[test]
    fn gssapi_keytab_without_path_should_fail() {
        let mut config = sasl("GSSAPI", "", "");
        config.gssapi = keytab_gssapi();
        config.gssapi.key_tab_path.clear();

        let result = build(&cluster(config));
        assert!(matches!(
            result,
            Err(AuthError::MissingCredentials { missing: "KeyTabPath", .. })
        ));
    }

    #[test]
    fn gssapi_unknown_auth_type_should_fail() {
        let mut config = sasl("GSSAPI", "", "");
        config.gssapi = keytab_gssapi();
        config.gssapi.auth_type = 3;

        let result = build(&cluster(config));
        assert!(matches!(
            result,
            Err(AuthError::UnknownGssapiAuthType { auth_type: 3, .. })
        ));
    }

    #[test_case("/etc/security/"; "directory")]
    #[test_case("/etc/a\0.keytab"; "nul byte")]
    fn malformed_keytab_path_should_fail(path: &str) {
        let mut config = sasl("GSSAPI", "", "");
        config.gssapi = keytab_gssapi();
        config.gssapi.key_tab_path = path.to_owned();

        let result = build(&cluster(config));
        assert!(matches!(
            result,
            Err(AuthError::MalformedPath { field: "KeyTabPath", .. })
        ));
    }

    #[test]
    fn tls_should_require_certificate_and_key_together() {
        let mut kafka = cluster(SaslConfig::default());
        kafka.tls = TlsConfig {
            enable: true,
            client_cert_file: "/etc/client.pem".to_owned(),
            ..Default::default()
        };

        let result = build(&kafka);
        assert!(matches!(
            result,
            Err(AuthError::IncompleteClientCertificate { .. })
        ));
    }

    #[test]
    fn tls_fields_should_be_ignored_when_disabled() {
        let mut kafka = cluster(SaslConfig::default());
        kafka.tls = TlsConfig {
            enable: false,
            client_cert_file: "/etc/".to_owned(),
            ..Default::default()
        };

        assert!(build(&kafka).unwrap().tls.is_none());
    }

    #[test]
    fn tls_with_scram_should_build_both_parts() {
        let mut kafka = cluster(sasl("SCRAM-SHA-256", "carol", "pw"));
        kafka.tls = TlsConfig {
            enable: true,
            ca_cert_files: "/etc/ca.pem".to_owned(),
            client_cert_file: "/etc/client.pem".to_owned(),
            client_key_file: "/etc/client.key".to_owned(),
            insecure_skip_verify: false,
        };

        let profile = build(&kafka).unwrap();

        let tls = profile.tls.clone().unwrap();
        assert_eq!(tls.ca_cert_file.as_deref(), Some("/etc/ca.pem"));
        assert_eq!(
            tls.client_identity,
            Some(("/etc/client.pem".to_owned(), "/etc/client.key".to_owned()))
        );
        assert_eq!(profile.to_string(), "SCRAM-SHA-256 + TLS");
    }

    #[test]
    fn debug_output_should_not_leak_passwords() {
        let profile = build(&cluster(sasl("PLAIN", "alice", "hunter2-long-secret"))).unwrap();

        let rendered = format!("{profile:?}");

        assert!(!rendered.contains("hunter2-long-secret"));
        assert!(rendered.contains("hun***"));
    }
}
