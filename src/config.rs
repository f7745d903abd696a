//! Two-layer configuration (spec §10.1, ambient addition): a `ConfFile` DTO
//! close to the literal JSON on disk, validated once into a runtime `Conf`.
//! `ConfHandle` wraps it in `Arc<RwLock<Arc<Conf>>>` (teacher's `config.rs`
//! pattern) for cheap snapshot reads from request handlers.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use camino::Utf8PathBuf;
use parking_lot::RwLock;
use picky::key::{PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};

pub const CONFIG_PATH_ENV: &str = "JOBAUTH_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "./jobauth.json";

pub mod dto {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    #[serde(rename_all = "kebab-case")]
    pub struct LdapConfFile {
        pub url: String,
        pub user_base: String,
        pub user_bind_dn_template: String,
        pub search_filter_template: String,
        pub sync_admin_dn: Option<String>,
        /// Human-friendly duration string (e.g. `"1h"`, `"30m"`), parsed with
        /// `humantime`.
        pub sync_interval: Option<String>,
        pub sync_user_on_login: Option<bool>,
        pub update_user_on_login: Option<bool>,
        pub sync_del_old_users: Option<bool>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    #[serde(rename_all = "kebab-case")]
    pub struct OidcConfFile {
        pub issuer: String,
        pub authorization_endpoint: String,
        pub token_endpoint: String,
        pub jwks_uri: String,
        pub userinfo_endpoint: Option<String>,
        pub client_id: String,
        pub redirect_uri: String,
    }

    /// The `jwts` section (spec §4.11): present only when bearer/cookie JWT
    /// auth is enabled at all. Each optional field gates one capability —
    /// `JwtCookieSessionProvider` additionally requires `cookie_name` and
    /// `trusted_issuer` on top of this section existing (spec §4.6).
    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    #[serde(rename_all = "kebab-case")]
    pub struct JwtConfFile {
        /// Human-friendly duration string (e.g. `"1h"`), parsed with `humantime`.
        pub max_age: Option<String>,
        pub cookie_name: Option<String>,
        pub trusted_issuer: Option<String>,
        pub validate_user: Option<bool>,
        pub sync_user_on_login: Option<bool>,
        pub update_user_on_login: Option<bool>,
    }

    /// On-disk shape. Secret material (keys, passwords) is deliberately kept
    /// out of this file and read from the environment instead (spec §6).
    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    #[serde(rename_all = "kebab-case")]
    pub struct ConfFile {
        pub listener_url: String,
        /// Human-friendly duration string (e.g. `"8h"`), parsed with
        /// `humantime` (SPEC_FULL.md §10.1).
        pub session_max_age: Option<String>,
        pub cookie_secure: Option<bool>,
        pub jwts: Option<JwtConfFile>,
        pub ldap: Option<LdapConfFile>,
        pub oidc: Option<OidcConfFile>,
    }

    impl ConfFile {
        pub fn generate_new() -> Self {
            Self {
                listener_url: "http://0.0.0.0:8080".to_owned(),
                session_max_age: Some("8h".to_owned()),
                cookie_secure: Some(true),
                jwts: None,
                ldap: None,
                oidc: None,
            }
        }
    }
}

pub struct LdapConf {
    pub settings: crate::providers::ldap::LdapConfig,
}

pub struct OidcConf {
    pub settings: crate::providers::oidc::OidcConfig,
}

/// Runtime shape of the `jwts` config section (spec §4.11): governs both
/// the bearer-JWT verifier shared by ordinary-request auth and the
/// dedicated cross-login cookie provider.
pub struct JwtRuntimeConf {
    pub max_age: std::time::Duration,
    pub cookie_name: Option<String>,
    pub trusted_issuer: Option<String>,
    pub validate_user: bool,
    pub sync_user_on_login: bool,
    pub update_user_on_login: bool,
}

/// Validated, process-wide configuration. Built once from a `dto::ConfFile`
/// plus environment-sourced secrets; never mutated in place afterward.
pub struct Conf {
    pub listener_url: String,
    pub session_max_age: Option<std::time::Duration>,
    pub cookie_secure: bool,

    pub jwt: Option<JwtRuntimeConf>,
    pub jwt_public_key: Option<PublicKey>,
    pub jwt_private_key: Option<PrivateKey>,
    pub trusted_external_public_key: Option<PublicKey>,

    pub login_token_key: Option<Vec<u8>>,

    pub ldap: Option<LdapConf>,
    pub oidc: Option<OidcConf>,
}

fn env_base64(name: &str) -> anyhow::Result<Option<Vec<u8>>> {
    use base64::Engine as _;
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(Some(
            base64::engine::general_purpose::STANDARD
                .decode(value)
                .with_context(|| format!("{name} is not valid base64"))?,
        )),
        Ok(_) | Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {name}")),
    }
}

impl Conf {
    /// Validates a `ConfFile` against the environment, producing a runtime
    /// `Conf`. Mirrors the teacher's `Conf::from_conf_file` shape: every
    /// fallible step carries `anyhow::Context` naming the failing field.
    ///
    /// `JWT_PUBLIC_KEY` is only required when the `jwts` section is present
    /// (spec §4.11) — a deployment with no JWT config at all simply runs
    /// without bearer/cookie JWT auth rather than failing to start.
    pub fn from_conf_file(conf_file: &dto::ConfFile) -> anyhow::Result<Self> {
        let jwt_public_key = conf_file
            .jwts
            .as_ref()
            .map(|_| -> anyhow::Result<PublicKey> {
                let bytes = env_base64("JWT_PUBLIC_KEY")?.context("JWT_PUBLIC_KEY is required when [jwts] is configured")?;
                PublicKey::from_der(&bytes).context("bad JWT_PUBLIC_KEY")
            })
            .transpose()?;

        let jwt_private_key = env_base64("JWT_PRIVATE_KEY")?
            .map(|bytes| PrivateKey::from_pkcs8(&bytes).context("bad JWT_PRIVATE_KEY"))
            .transpose()?;

        let trusted_external_public_key = env_base64("CROSS_LOGIN_JWT_PUBLIC_KEY")?
            .map(|bytes| PublicKey::from_der(&bytes).context("bad CROSS_LOGIN_JWT_PUBLIC_KEY"))
            .transpose()?;

        let login_token_key = env_base64("CROSS_LOGIN_JWT_HS512_KEY")?;

        let jwt = conf_file
            .jwts
            .as_ref()
            .map(|jwt_conf| -> anyhow::Result<JwtRuntimeConf> {
                let max_age = jwt_conf
                    .max_age
                    .as_deref()
                    .map(humantime::parse_duration)
                    .transpose()
                    .context("bad jwts.max-age")?
                    .unwrap_or(std::time::Duration::from_secs(300));

                Ok(JwtRuntimeConf {
                    max_age,
                    cookie_name: jwt_conf.cookie_name.clone(),
                    trusted_issuer: jwt_conf.trusted_issuer.clone(),
                    validate_user: jwt_conf.validate_user.unwrap_or(false),
                    sync_user_on_login: jwt_conf.sync_user_on_login.unwrap_or(false),
                    update_user_on_login: jwt_conf.update_user_on_login.unwrap_or(false),
                })
            })
            .transpose()
            .context("bad [jwts] section")?;

        let ldap = conf_file
            .ldap
            .as_ref()
            .map(|ldap_conf| -> anyhow::Result<LdapConf> {
                let sync_admin_password = env::var("LDAP_ADMIN_PASSWORD").ok().map(secrecy::SecretString::from);
                let sync_interval = ldap_conf
                    .sync_interval
                    .as_deref()
                    .map(humantime::parse_duration)
                    .transpose()
                    .context("bad ldap.sync-interval")?
                    .unwrap_or(std::time::Duration::from_secs(3600));

                Ok(LdapConf {
                    settings: crate::providers::ldap::LdapConfig {
                        url: ldap_conf.url.clone(),
                        user_base: ldap_conf.user_base.clone(),
                        user_bind_dn_template: ldap_conf.user_bind_dn_template.clone(),
                        search_filter_template: ldap_conf.search_filter_template.clone(),
                        sync_admin_dn: ldap_conf.sync_admin_dn.clone(),
                        sync_admin_password,
                        sync_interval,
                        sync_user_on_login: ldap_conf.sync_user_on_login.unwrap_or(false),
                        update_user_on_login: ldap_conf.update_user_on_login.unwrap_or(false),
                        sync_del_old_users: ldap_conf.sync_del_old_users.unwrap_or(false),
                    },
                })
            })
            .transpose()
            .context("bad [ldap] section")?;

        let oidc = conf_file
            .oidc
            .as_ref()
            .map(|oidc_conf| -> anyhow::Result<OidcConf> {
                let client_secret = secrecy::SecretString::from(env::var("OID_CLIENT_SECRET").unwrap_or_default());
                Ok(OidcConf {
                    settings: crate::providers::oidc::OidcConfig {
                        issuer: oidc_conf.issuer.clone(),
                        authorization_endpoint: oidc_conf
                            .authorization_endpoint
                            .parse()
                            .context("bad oidc.authorization-endpoint")?,
                        token_endpoint: oidc_conf.token_endpoint.parse().context("bad oidc.token-endpoint")?,
                        jwks_uri: oidc_conf.jwks_uri.parse().context("bad oidc.jwks-uri")?,
                        userinfo_endpoint: oidc_conf
                            .userinfo_endpoint
                            .as_deref()
                            .map(str::parse)
                            .transpose()
                            .context("bad oidc.userinfo-endpoint")?,
                        client_id: env::var("OID_CLIENT_ID").unwrap_or_else(|_| oidc_conf.client_id.clone()),
                        client_secret,
                        redirect_uri: oidc_conf.redirect_uri.parse().context("bad oidc.redirect-uri")?,
                    },
                })
            })
            .transpose()
            .context("bad [oidc] section")?;

        let session_max_age = conf_file
            .session_max_age
            .as_deref()
            .map(humantime::parse_duration)
            .transpose()
            .context("bad session-max-age")?;

        Ok(Self {
            listener_url: conf_file.listener_url.clone(),
            session_max_age,
            cookie_secure: conf_file.cookie_secure.unwrap_or(true),
            jwt,
            jwt_public_key,
            jwt_private_key,
            trusted_external_public_key,
            login_token_key,
            ldap,
            oidc,
        })
    }
}

fn config_path() -> Utf8PathBuf {
    env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned()).into()
}

fn load_conf_file_or_generate_new(path: &Utf8PathBuf) -> anyhow::Result<dto::ConfFile> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).with_context(|| format!("parsing {path}")),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(%path, "config file not found, generating a default one");
            let conf_file = dto::ConfFile::generate_new();
            std::fs::write(path, serde_json::to_string_pretty(&conf_file)?).with_context(|| format!("writing {path}"))?;
            Ok(conf_file)
        }
        Err(err) => Err(err).with_context(|| format!("reading {path}")),
    }
}

struct ConfHandleInner {
    conf: RwLock<Arc<Conf>>,
    conf_file: RwLock<Arc<dto::ConfFile>>,
}

/// Cheap-to-clone snapshot handle over the validated config. Bootstrap loads
/// it exactly once (spec §4.11); it is not hot-reloaded at runtime (see
/// SPEC_FULL.md §10.5).
#[derive(Clone)]
pub struct ConfHandle {
    inner: Arc<ConfHandleInner>,
}

impl ConfHandle {
    pub fn init() -> anyhow::Result<Self> {
        let path = config_path();
        let conf_file = load_conf_file_or_generate_new(&path)?;
        let conf = Conf::from_conf_file(&conf_file).context("invalid configuration")?;

        Ok(Self {
            inner: Arc::new(ConfHandleInner {
                conf: RwLock::new(Arc::new(conf)),
                conf_file: RwLock::new(Arc::new(conf_file)),
            }),
        })
    }

    pub fn get_conf(&self) -> Arc<Conf> {
        self.inner.conf.read().clone()
    }

    pub fn get_conf_file(&self) -> Arc<dto::ConfFile> {
        self.inner.conf_file.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_new_produces_a_conf_file_with_sane_defaults() {
        let conf_file = dto::ConfFile::generate_new();
        assert!(conf_file.listener_url.starts_with("http"));
        assert_eq!(conf_file.cookie_secure, Some(true));
        assert!(conf_file.jwts.is_none());
    }

    #[test]
    fn jwt_public_key_is_not_required_without_a_jwts_section() {
        let conf_file = dto::ConfFile {
            jwts: None,
            ..dto::ConfFile::generate_new()
        };
        let conf = Conf::from_conf_file(&conf_file).expect("should not require JWT_PUBLIC_KEY");
        assert!(conf.jwt_public_key.is_none());
        assert!(conf.jwt.is_none());
    }

    #[test]
    fn reloading_a_written_default_config_round_trips_through_a_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path: Utf8PathBuf = dir.path().join("jobauth.json").try_into().expect("utf8 path");

        let original = dto::ConfFile::generate_new();
        std::fs::write(&path, serde_json::to_string_pretty(&original).unwrap()).unwrap();

        let loaded = load_conf_file_or_generate_new(&path).expect("load");
        assert_eq!(loaded.listener_url, original.listener_url);
    }
}
