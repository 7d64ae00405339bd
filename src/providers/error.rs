use std::fmt;

/// Classified provider error — tells the caller *why* the LLM call failed.
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403 — bad API key or permissions.
    Auth,
    /// 402 — billing/quota exhausted.
    Billing,
    /// 429 — rate limited.
    RateLimit,
    /// 404 or "model not found" — bad model name.
    NotFound,
    /// 408 or the provider took too long.
    Timeout,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// 500/502/503/504 — provider-side outage.
    ServerError,
    /// Anything else.
    Unknown,
}

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            402 => ProviderErrorKind::Billing,
            404 => ProviderErrorKind::NotFound,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimit,
            500 | 502 | 503 | 504 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };

        Self {
            kind,
            status: Some(status),
            message: truncate_body(body),
        }
    }

    /// Short French message for the browser's error banner. The raw
    /// status and body stay in the logs only.
    pub fn user_message(&self) -> String {
        match self.kind {
            ProviderErrorKind::Auth => {
                "Clé API du fournisseur de modèle invalide ou permissions insuffisantes."
                    .to_string()
            }
            ProviderErrorKind::Billing => {
                "Quota ou crédit du fournisseur de modèle épuisé.".to_string()
            }
            ProviderErrorKind::RateLimit => {
                "Trop de requêtes vers le fournisseur de modèle. Réessayez dans un instant."
                    .to_string()
            }
            ProviderErrorKind::NotFound => {
                "Modèle introuvable chez le fournisseur. Vérifiez la configuration.".to_string()
            }
            ProviderErrorKind::Timeout => {
                "Le fournisseur de modèle n'a pas répondu à temps.".to_string()
            }
            ProviderErrorKind::Network => {
                "Connexion au fournisseur de modèle impossible.".to_string()
            }
            ProviderErrorKind::ServerError => {
                "Le fournisseur de modèle rencontre un incident. Réessayez.".to_string()
            }
            ProviderErrorKind::Unknown => format!("Erreur du fournisseur de modèle: {}", self),
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{:?} ({}): {}", self.kind, status, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Response bodies can be huge (HTML error pages); keep the stored message
/// bounded and on a char boundary.
fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(ProviderError::from_status(401, "").kind, ProviderErrorKind::Auth);
        assert_eq!(ProviderError::from_status(402, "").kind, ProviderErrorKind::Billing);
        assert_eq!(ProviderError::from_status(429, "").kind, ProviderErrorKind::RateLimit);
        assert_eq!(ProviderError::from_status(503, "").kind, ProviderErrorKind::ServerError);
        assert_eq!(ProviderError::from_status(418, "").kind, ProviderErrorKind::Unknown);
    }

    #[test]
    fn user_message_follows_kind() {
        let rate_limited = ProviderError::from_status(429, "slow down");
        assert!(rate_limited.user_message().contains("Trop de requêtes"));
        // Raw body never leaks into the classified messages.
        assert!(!rate_limited.user_message().contains("slow down"));

        let unknown = ProviderError::from_status(418, "teapot");
        assert!(unknown.user_message().contains("teapot"));
    }

    #[test]
    fn long_body_truncated_on_char_boundary() {
        let body = "é".repeat(600);
        let err = ProviderError::from_status(500, &body);
        assert!(err.message.len() < body.len());
        assert!(err.message.ends_with('…'));
    }
}
