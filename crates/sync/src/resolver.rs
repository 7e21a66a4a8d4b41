//! Product identity resolution.
//!
//! The cart endpoint of some server versions omits the product ID of each
//! line. A [`ResolutionPass`] fills the gap by matching the line's product
//! name against the catalog. The catalog is fetched at most once per pass and
//! only when a line actually needs it.
//!
//! Match precedence, first hit wins:
//! 1. exact match on the normalized name (lowercase, trimmed, whitespace
//!    collapsed)
//! 2. case-insensitive exact match on the raw name
//! 3. case-insensitive substring match in either direction

use thiserror::Error;
use tidecart_core::ProductId;
use tracing::{debug, instrument, warn};

use crate::backend::{BackendError, CartBackend, CatalogProduct};

/// Errors returned by identity resolution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// No catalog product matches the name.
    #[error("no catalog product matches \"{0}\"")]
    NotFound(String),

    /// The catalog could not be fetched.
    #[error("catalog unavailable: {0}")]
    Catalog(#[from] BackendError),
}

/// How a resolution was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    /// The caller already knew the ID; no lookup happened.
    Known,
    NormalizedExact,
    CaseInsensitiveExact,
    Substring,
}

/// A resolved product identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub product_id: ProductId,
    /// Catalog image, for filling gaps in the cart payload. Always `None`
    /// for [`MatchKind::Known`].
    pub image_ref: Option<String>,
    pub matched_by: MatchKind,
}

/// Lowercase, trim and collapse internal whitespace to single spaces.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

struct IndexEntry {
    normalized: String,
    lowered: String,
    product: CatalogProduct,
}

/// Catalog index keyed by product name, rebuilt for every pass.
pub struct ProductIndex {
    entries: Vec<IndexEntry>,
}

impl ProductIndex {
    /// Build an index over a catalog listing. Catalog order is kept, so the
    /// first listed product wins ties.
    #[must_use]
    pub fn new(products: Vec<CatalogProduct>) -> Self {
        let entries = products
            .into_iter()
            .map(|product| IndexEntry {
                normalized: normalize_name(&product.name),
                lowered: product.name.to_lowercase(),
                product,
            })
            .collect();
        Self { entries }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the product for `name`, following the match precedence.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<(&CatalogProduct, MatchKind)> {
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return None;
        }

        if let Some(entry) = self.entries.iter().find(|e| e.normalized == normalized) {
            return Some((&entry.product, MatchKind::NormalizedExact));
        }

        let lowered = name.to_lowercase();
        if let Some(entry) = self.entries.iter().find(|e| e.lowered == lowered) {
            return Some((&entry.product, MatchKind::CaseInsensitiveExact));
        }

        self.entries
            .iter()
            .filter(|e| !e.normalized.is_empty())
            .find(|e| e.normalized.contains(&normalized) || normalized.contains(&e.normalized))
            .map(|e| (&e.product, MatchKind::Substring))
    }
}

/// One resolution pass: a reconciliation or a checkout run.
///
/// Holds the catalog index for the pass. A failed catalog fetch is
/// remembered too, so one outage costs one fetch per pass rather than one
/// per line.
pub struct ResolutionPass<'a> {
    backend: &'a dyn CartBackend,
    index: Option<Result<ProductIndex, BackendError>>,
}

impl<'a> ResolutionPass<'a> {
    #[must_use]
    pub fn new(backend: &'a dyn CartBackend) -> Self {
        Self {
            backend,
            index: None,
        }
    }

    /// Pass over a catalog that is already known.
    #[must_use]
    pub fn with_index(backend: &'a dyn CartBackend, index: ProductIndex) -> Self {
        Self {
            backend,
            index: Some(Ok(index)),
        }
    }

    /// Whether the catalog has been fetched during this pass.
    #[must_use]
    pub const fn catalog_loaded(&self) -> bool {
        self.index.is_some()
    }

    /// Resolve a product identity.
    ///
    /// A `known_id` is returned unchanged without touching the catalog.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::NotFound` when nothing matches, or
    /// `ResolveError::Catalog` when the catalog cannot be fetched.
    #[instrument(skip(self), fields(known = known_id.is_some()))]
    pub async fn resolve(
        &mut self,
        name: &str,
        known_id: Option<ProductId>,
    ) -> Result<Resolution, ResolveError> {
        if let Some(product_id) = known_id {
            return Ok(Resolution {
                product_id,
                image_ref: None,
                matched_by: MatchKind::Known,
            });
        }

        let index = self.index().await?;
        match index.lookup(name) {
            Some((product, matched_by)) => {
                debug!(product_id = %product.id, ?matched_by, "Resolved product by name");
                Ok(Resolution {
                    product_id: product.id,
                    image_ref: product.image_ref.clone(),
                    matched_by,
                })
            }
            None => {
                warn!(name, catalog_size = index.len(), "No catalog product matches");
                Err(ResolveError::NotFound(name.to_string()))
            }
        }
    }

    async fn index(&mut self) -> Result<&ProductIndex, ResolveError> {
        let slot = match self.index.take() {
            Some(slot) => slot,
            None => {
                let fetched = self.backend.list_products().await.map(ProductIndex::new);
                if let Err(e) = &fetched {
                    warn!(error = %e, "Catalog fetch failed");
                }
                fetched
            }
        };
        match self.index.insert(slot) {
            Ok(index) => Ok(&*index),
            Err(e) => Err(ResolveError::Catalog(e.clone())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::http::NetworkError;
    use crate::testing::FakeBackend;

    fn product(id: i64, name: &str) -> CatalogProduct {
        CatalogProduct {
            id: ProductId::new(id),
            name: name.to_string(),
            image_ref: Some(format!("{id}.jpg")),
        }
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Filtro   de\tÓleo "), "filtro de óleo");
        assert_eq!(normalize_name("   "), "");
    }

    #[test]
    fn test_normalized_exact_beats_substring() {
        let index = ProductIndex::new(vec![product(3, "Audi A4 Avant"), product(7, "audi a4")]);
        let (found, kind) = index.lookup("Audi A4 ").unwrap();
        assert_eq!(found.id, ProductId::new(7));
        assert_eq!(kind, MatchKind::NormalizedExact);
    }

    #[test]
    fn test_substring_either_direction() {
        let index = ProductIndex::new(vec![product(1, "Pastilha de freio dianteira")]);
        assert_eq!(
            index.lookup("pastilha de freio").unwrap().1,
            MatchKind::Substring
        );

        let index = ProductIndex::new(vec![product(2, "Vela")]);
        let (found, kind) = index.lookup("Vela de ignição NGK").unwrap();
        assert_eq!(found.id, ProductId::new(2));
        assert_eq!(kind, MatchKind::Substring);
    }

    #[test]
    fn test_no_match_and_blank_query() {
        let index = ProductIndex::new(vec![product(1, "Amortecedor")]);
        assert!(index.lookup("Radiador").is_none());
        assert!(index.lookup("   ").is_none());
    }

    #[tokio::test]
    async fn test_known_id_skips_catalog() {
        let backend = FakeBackend::new();
        let mut pass = ResolutionPass::new(&backend);
        let resolution = pass
            .resolve("anything", Some(ProductId::new(42)))
            .await
            .unwrap();
        assert_eq!(resolution.product_id, ProductId::new(42));
        assert_eq!(resolution.matched_by, MatchKind::Known);
        assert_eq!(backend.catalog_calls(), 0);
        assert!(!pass.catalog_loaded());
    }

    #[tokio::test]
    async fn test_catalog_fetched_once_per_pass() {
        let backend = FakeBackend::new();
        backend.set_catalog(vec![product(9, "Filtro de Óleo"), product(4, "Correia")]);
        let mut pass = ResolutionPass::new(&backend);

        let first = pass.resolve("Filtro de Óleo", None).await.unwrap();
        let second = pass.resolve("correia", None).await.unwrap();
        let missing = pass.resolve("Radiador", None).await;

        assert_eq!(first.product_id, ProductId::new(9));
        assert_eq!(first.image_ref.as_deref(), Some("9.jpg"));
        assert_eq!(second.product_id, ProductId::new(4));
        assert!(matches!(missing, Err(ResolveError::NotFound(_))));
        assert_eq!(backend.catalog_calls(), 1);
    }

    #[tokio::test]
    async fn test_catalog_failure_is_remembered() {
        let backend = FakeBackend::new();
        backend.fail_catalog(NetworkError::Timeout);
        let mut pass = ResolutionPass::new(&backend);

        assert!(matches!(
            pass.resolve("a", None).await,
            Err(ResolveError::Catalog(_))
        ));
        assert!(matches!(
            pass.resolve("b", None).await,
            Err(ResolveError::Catalog(_))
        ));
        assert_eq!(backend.catalog_calls(), 1);
    }
}
