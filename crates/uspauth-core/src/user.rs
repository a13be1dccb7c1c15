//! User profile returned by the authority alongside a credential.
//!
//! Field names on the wire follow the authority's JSON keys; the Rust names
//! are the English equivalents.

use serde::{Deserialize, Serialize};

/// The logged-in user as described by the authority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    #[serde(rename = "loginUsuario")]
    pub login: String,
    #[serde(rename = "nomeUsuario")]
    pub name: String,
    #[serde(rename = "emailPrincipalUsuario")]
    pub primary_email: String,
    #[serde(rename = "emailAlternativoUsuario")]
    pub alternate_email: String,
    #[serde(rename = "emailUspUsuario")]
    pub institutional_email: String,
    #[serde(rename = "numeroTelefoneFormatado")]
    pub phone: String,
    #[serde(rename = "tipoUsuario")]
    pub user_type: String,
    #[serde(rename = "wsuserid")]
    pub ws_user_id: String,
    #[serde(rename = "vinculos")]
    pub affiliations: Vec<Affiliation>,
}

impl UserProfile {
    /// Non-empty email addresses, primary first.
    pub fn emails(&self) -> impl Iterator<Item = &str> {
        [
            &self.primary_email,
            &self.institutional_email,
            &self.alternate_email,
        ]
        .into_iter()
        .map(String::as_str)
        .filter(|email| !email.is_empty())
    }

    pub fn has_affiliation(&self, kind: &str) -> bool {
        self.affiliations.iter().any(|a| a.kind == kind)
    }
}

/// One institutional affiliation of a user (unit, sector and role).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Affiliation {
    #[serde(rename = "codigoSetor")]
    pub sector_code: i64,
    #[serde(rename = "codigoUnidade")]
    pub unit_code: i64,
    #[serde(rename = "nomeUnidade")]
    pub unit_name: String,
    #[serde(rename = "nomeVinculo")]
    pub name: String,
    #[serde(rename = "siglaUnidade")]
    pub unit_acronym: String,
    #[serde(rename = "tipoVinculo")]
    pub kind: String,
}
