//! Storage pricing for migration cost estimates.
//!
//! Prices are USD per GB-month and pluggable: callers with negotiated rates
//! override entries on a [`PriceTable`] instead of patching constants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::StorageClass;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// USD per GB-month, keyed by storage class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    prices: BTreeMap<StorageClass, f64>,
}

impl Default for PriceTable {
    fn default() -> Self {
        let prices = BTreeMap::from([
            (StorageClass::Standard, 0.023),
            (StorageClass::IntelligentTiering, 0.0125),
            (StorageClass::StandardIa, 0.0125),
            (StorageClass::Glacier, 0.004),
            (StorageClass::DeepArchive, 0.00099),
        ]);
        Self { prices }
    }
}

impl PriceTable {
    /// Override the price for one class.
    pub fn with_price(mut self, class: StorageClass, usd_per_gb_month: f64) -> Self {
        self.prices.insert(class, usd_per_gb_month);
        self
    }

    /// Price for `class`; classes missing from a custom table cost nothing.
    pub fn price_per_gb_month(&self, class: StorageClass) -> f64 {
        self.prices.get(&class).copied().unwrap_or(0.0)
    }

    pub fn estimate(&self, total_bytes: u64, class: StorageClass) -> CostEstimate {
        let size_gb = total_bytes as f64 / BYTES_PER_GB;
        let monthly_usd = size_gb * self.price_per_gb_month(class);
        CostEstimate {
            storage_class: class,
            size_gb,
            monthly_usd,
            yearly_usd: monthly_usd * 12.0,
        }
    }

    /// One estimate per class in the table, cheapest class last.
    pub fn estimate_all(&self, total_bytes: u64) -> Vec<CostEstimate> {
        let mut all: Vec<CostEstimate> = self
            .prices
            .keys()
            .map(|class| self.estimate(total_bytes, *class))
            .collect();
        all.sort_by(|a, b| b.monthly_usd.total_cmp(&a.monthly_usd));
        all
    }
}

/// Projected storage cost for a volume of data in one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub storage_class: StorageClass,
    pub size_gb: f64,
    pub monthly_usd: f64,
    pub yearly_usd: f64,
}
