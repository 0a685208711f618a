use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::types::Transaction;

/// Fixed MCC -> category name table; unrecognized codes fall back to "Other".
static MCC_CATEGORIES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("5411", "Grocery"),
        ("5412", "Grocery"),
        ("5812", "Dining"),
        ("5813", "Dining"),
        ("5541", "Fuel"),
        ("5999", "Retail"),
        ("4111", "Transit"),
        ("4899", "Subscriptions"),
        ("6011", "Cash Withdrawal"),
        ("7011", "Travel"),
    ])
});

fn category_for(mcc: &str) -> &'static str {
    MCC_CATEGORIES.get(mcc).copied().unwrap_or("Other")
}

#[derive(Debug, Clone, Serialize)]
pub struct MerchantTotal {
    pub merchant: String,
    pub total_minor: i64,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryBreakdown {
    pub category: String,
    pub total_minor: i64,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyTrend {
    pub month: String,
    pub total_minor: i64,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub transaction_id: uuid::Uuid,
    pub amount_minor: i64,
    pub merchant: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsightsSummary {
    pub total_spend_minor: i64,
    pub count: u32,
    pub average_minor: i64,
    pub top_merchants: Vec<MerchantTotal>,
    pub category_breakdown: Vec<CategoryBreakdown>,
    pub monthly_trend: Vec<MonthlyTrend>,
    pub anomalies: Vec<Anomaly>,
}

const TOP_MERCHANTS: usize = 10;
const MAX_ANOMALIES: usize = 5;
const ANOMALY_MULTIPLIER: f64 = 3.0;

/// Compute spend/merchant/category/anomaly aggregates over a single query result
/// set already filtered to the requested day window. Purely computational — no
/// I/O happens here.
pub fn summarize(transactions: &[Transaction]) -> InsightsSummary {
    let count = transactions.len() as u32;
    let total_spend_minor: i64 = transactions.iter().map(|t| t.amount_minor).sum();
    let average_minor = if count > 0 {
        total_spend_minor / count as i64
    } else {
        0
    };

    let mut by_merchant: HashMap<&str, (i64, u32)> = HashMap::new();
    let mut by_category: HashMap<&str, (i64, u32)> = HashMap::new();
    let mut by_month: HashMap<String, (i64, u32)> = HashMap::new();

    for txn in transactions {
        let merchant_entry = by_merchant.entry(txn.merchant.as_str()).or_insert((0, 0));
        merchant_entry.0 += txn.amount_minor;
        merchant_entry.1 += 1;

        let category_entry = by_category.entry(category_for(&txn.mcc)).or_insert((0, 0));
        category_entry.0 += txn.amount_minor;
        category_entry.1 += 1;

        let month_key = txn.timestamp.format("%Y-%m").to_string();
        let month_entry = by_month.entry(month_key).or_insert((0, 0));
        month_entry.0 += txn.amount_minor;
        month_entry.1 += 1;
    }

    let mut top_merchants: Vec<MerchantTotal> = by_merchant
        .into_iter()
        .map(|(merchant, (total_minor, count))| MerchantTotal {
            merchant: merchant.to_string(),
            total_minor,
            count,
        })
        .collect();
    top_merchants.sort_by(|a, b| b.total_minor.cmp(&a.total_minor));
    top_merchants.truncate(TOP_MERCHANTS);

    let mut category_breakdown: Vec<CategoryBreakdown> = by_category
        .into_iter()
        .map(|(category, (total_minor, count))| CategoryBreakdown {
            category: category.to_string(),
            total_minor,
            count,
        })
        .collect();
    category_breakdown.sort_by(|a, b| b.total_minor.cmp(&a.total_minor));

    let mut monthly_trend: Vec<MonthlyTrend> = by_month
        .into_iter()
        .map(|(month, (total_minor, count))| MonthlyTrend {
            month,
            total_minor,
            count,
        })
        .collect();
    monthly_trend.sort_by(|a, b| a.month.cmp(&b.month));

    let anomaly_threshold = (average_minor as f64 * ANOMALY_MULTIPLIER) as i64;
    let mut anomalies: Vec<Anomaly> = transactions
        .iter()
        .filter(|txn| anomaly_threshold > 0 && txn.amount_minor > anomaly_threshold)
        .map(|txn| Anomaly {
            transaction_id: txn.id,
            amount_minor: txn.amount_minor,
            merchant: txn.merchant.clone(),
            timestamp: txn.timestamp,
        })
        .collect();
    anomalies.sort_by(|a, b| b.amount_minor.cmp(&a.amount_minor));
    anomalies.truncate(MAX_ANOMALIES);

    InsightsSummary {
        total_spend_minor,
        count,
        average_minor,
        top_merchants,
        category_breakdown,
        monthly_trend,
        anomalies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionStatus;
    use uuid::Uuid;

    fn txn(amount_minor: i64, merchant: &str, mcc: &str) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            card_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            amount_minor,
            merchant: merchant.to_string(),
            mcc: mcc.to_string(),
            currency: "INR".to_string(),
            device_id: None,
            city: None,
            country: "IN".to_string(),
            status: TransactionStatus::Posted,
        }
    }

    #[test]
    fn computes_totals_and_average() {
        let txns = vec![txn(1000, "A", "5411"), txn(2000, "B", "5812")];
        let summary = summarize(&txns);
        assert_eq!(summary.total_spend_minor, 3000);
        assert_eq!(summary.count, 2);
        assert_eq!(summary.average_minor, 1500);
    }

    #[test]
    fn flags_anomalies_above_three_times_average() {
        let mut txns = vec![txn(100, "A", "5411"); 9];
        txns.push(txn(10_000, "Suspicious Co", "5999"));
        let summary = summarize(&txns);
        assert_eq!(summary.anomalies.len(), 1);
        assert_eq!(summary.anomalies[0].merchant, "Suspicious Co");
    }

    #[test]
    fn maps_known_mcc_to_category_and_unknown_to_other() {
        let txns = vec![txn(100, "A", "5411"), txn(100, "B", "9999")];
        let summary = summarize(&txns);
        let categories: Vec<&str> = summary
            .category_breakdown
            .iter()
            .map(|c| c.category.as_str())
            .collect();
        assert!(categories.contains(&"Grocery"));
        assert!(categories.contains(&"Other"));
    }
}
