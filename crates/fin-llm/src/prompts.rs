//! Credit-committee report prompts built from a financial model.

use crate::format::{compound_growth, fmt_currency_mm, fmt_num, fmt_pct};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::str::FromStr;

pub const REPORT_SYSTEM_PROMPT: &str = "You are a senior credit analyst preparing material \
for a bank Credit Committee. Be precise, quantitative and decisive. Write in plain text only: \
no markdown emphasis, no headings with hash marks, no backticks. Use dashes or numbers for lists.";

const DEFAULT_MIN_DSCR: f64 = 1.2;
const DEFAULT_MAX_LEVERAGE: f64 = 3.5;
const DEFAULT_TARGET_ICR: f64 = 2.0;
const ORDERLY_LIQUIDATION_HAIRCUT: f64 = 0.70;
const FORCED_SALE_HAIRCUT: f64 = 0.50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportSection {
    ExecutiveSummary,
    HistoricalPerformance,
    IndustryBenchmarking,
    CreditAnalysis,
    CollateralAnalysis,
    CovenantAnalysis,
    SensitivityAnalysis,
    RefinancingRisk,
    EsgAndRegulatory,
    BusinessAnalysis,
    Recommendation,
    RiskAssessment,
    ScenarioAnalysis,
    SponsorAnalysis,
}

impl ReportSection {
    pub const ALL: [ReportSection; 14] = [
        ReportSection::ExecutiveSummary,
        ReportSection::HistoricalPerformance,
        ReportSection::IndustryBenchmarking,
        ReportSection::CreditAnalysis,
        ReportSection::CollateralAnalysis,
        ReportSection::CovenantAnalysis,
        ReportSection::SensitivityAnalysis,
        ReportSection::RefinancingRisk,
        ReportSection::EsgAndRegulatory,
        ReportSection::BusinessAnalysis,
        ReportSection::Recommendation,
        ReportSection::RiskAssessment,
        ReportSection::ScenarioAnalysis,
        ReportSection::SponsorAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportSection::ExecutiveSummary => "executiveSummary",
            ReportSection::HistoricalPerformance => "historicalPerformance",
            ReportSection::IndustryBenchmarking => "industryBenchmarking",
            ReportSection::CreditAnalysis => "creditAnalysis",
            ReportSection::CollateralAnalysis => "collateralAnalysis",
            ReportSection::CovenantAnalysis => "covenantAnalysis",
            ReportSection::SensitivityAnalysis => "sensitivityAnalysis",
            ReportSection::RefinancingRisk => "refinancingRisk",
            ReportSection::EsgAndRegulatory => "esgAndRegulatory",
            ReportSection::BusinessAnalysis => "businessAnalysis",
            ReportSection::Recommendation => "recommendation",
            ReportSection::RiskAssessment => "riskAssessment",
            ReportSection::ScenarioAnalysis => "scenarioAnalysis",
            ReportSection::SponsorAnalysis => "sponsorAnalysis",
        }
    }
}

impl FromStr for ReportSection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportSection::ALL
            .into_iter()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| format!("unknown report section: {s}"))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoricalYear {
    #[serde(default)]
    pub year: Option<Value>,
    #[serde(default)]
    pub revenue: Option<Value>,
    #[serde(default)]
    pub ebitda: Option<Value>,
}

impl HistoricalYear {
    pub fn revenue(&self) -> Option<f64> {
        number(self.revenue.as_ref())
    }
}

/// The caller's financial model. Every field is optional; missing figures
/// render as zero or "Not specified".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelData {
    #[serde(default)]
    pub model_summary: Option<Value>,
    #[serde(default)]
    pub projections: Option<Value>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub historical_data: Vec<HistoricalYear>,
    #[serde(default)]
    pub ccy: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CreditStats {
    pub min_dscr: f64,
    pub max_leverage: f64,
    pub min_icr: f64,
}

/// Numeric value of a JSON number or a numeric string such as `"16000000"`.
fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

impl ModelData {
    fn currency(&self) -> &str {
        self.ccy
            .as_ref()
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .unwrap_or("USD")
    }

    fn param(&self, key: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|p| p.get(key))
    }

    fn param_num(&self, key: &str) -> Option<f64> {
        number(self.param(key)).filter(|v| *v != 0.0)
    }

    fn param_text(&self, key: &str) -> String {
        self.param(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("Not specified")
            .to_string()
    }

    fn scenario(&self, name: &str) -> Option<&Value> {
        self.projections.as_ref().and_then(|p| p.get(name))
    }

    fn base_rows(&self) -> &[Value] {
        self.scenario("base")
            .and_then(|b| b.get("rows"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn credit_stats(&self) -> CreditStats {
        stats_of(self.scenario("base"))
    }

    /// First projected year's EBITDA over revenue.
    pub fn ebitda_margin(&self) -> f64 {
        let first = self.base_rows().first();
        let ebitda = number(first.and_then(|r| r.get("ebitda"))).unwrap_or(0.0);
        let revenue = number(first.and_then(|r| r.get("revenue")))
            .filter(|r| *r != 0.0)
            .unwrap_or(1.0);
        ebitda / revenue
    }

    pub fn revenue_cagr(&self) -> Option<f64> {
        let revenues: Vec<f64> = self
            .historical_data
            .iter()
            .filter_map(HistoricalYear::revenue)
            .collect();
        compound_growth(&revenues)
    }

    fn min_dscr_covenant(&self) -> f64 {
        self.param_num("minDSCR").unwrap_or(DEFAULT_MIN_DSCR)
    }

    fn max_leverage_covenant(&self) -> f64 {
        self.param_num("maxNDToEBITDA").unwrap_or(DEFAULT_MAX_LEVERAGE)
    }

    fn target_icr(&self) -> f64 {
        self.param_num("targetICR").unwrap_or(DEFAULT_TARGET_ICR)
    }

    fn loan_amount(&self) -> f64 {
        number(self.param("requestedLoanAmount")).unwrap_or(0.0)
    }

    fn collateral_value(&self) -> f64 {
        number(self.param("collateralValue")).unwrap_or(0.0)
    }

    fn loan_to_value(&self, haircut: f64) -> String {
        let value = self.collateral_value() * haircut;
        if value > 0.0 {
            format!("{}%", fmt_num(self.loan_amount() / value * 100.0))
        } else {
            "N/A".to_string()
        }
    }
}

fn stats_of(scenario: Option<&Value>) -> CreditStats {
    let stats = scenario.and_then(|s| s.get("creditStats"));
    CreditStats {
        min_dscr: number(stats.and_then(|s| s.get("minDSCR"))).unwrap_or(0.0),
        max_leverage: number(stats.and_then(|s| s.get("maxLeverage"))).unwrap_or(0.0),
        min_icr: number(stats.and_then(|s| s.get("minICR"))).unwrap_or(0.0),
    }
}

fn breaches_of(scenario: &Value) -> f64 {
    let breaches = scenario.get("breaches");
    number(breaches.and_then(|b| b.get("dscrBreaches"))).unwrap_or(0.0)
        + number(breaches.and_then(|b| b.get("icrBreaches"))).unwrap_or(0.0)
}

fn scenario_line(name: &str, scenario: &Value) -> String {
    format!(
        "{name}: IRR {}, min DSCR {}x, covenant breaches {}",
        fmt_pct(number(scenario.get("irr")).unwrap_or(0.0)),
        fmt_num(stats_of(Some(scenario)).min_dscr),
        breaches_of(scenario)
    )
}

const PLAIN_TEXT_FOOTER: &str = "Plain text only. Maximum 400 words.";

/// Builds the user prompt for one report section.
pub fn build_prompt(section: ReportSection, data: &ModelData) -> String {
    let stats = data.credit_stats();
    let ccy = data.currency();
    let dscr_cov = data.min_dscr_covenant();
    let lev_cov = data.max_leverage_covenant();
    let icr_target = data.target_icr();
    let industry = data.param_text("industry");
    let mut p = String::new();

    // Writing to a String cannot fail.
    let _ = match section {
        ReportSection::ExecutiveSummary => writeln!(
            p,
            "Write a three-paragraph executive summary for the Credit Committee.\n\
             1. Transaction: borrower, industry ({industry}), facility size {}, purpose.\n\
             2. Credit: DSCR {}x, leverage {}x, ICR {}x; DSCR covenant {}x leaves {}x cushion.\n\
             3. Risks and a clear APPROVE / APPROVE WITH CONDITIONS / DECLINE recommendation.",
            fmt_currency_mm(data.loan_amount(), ccy),
            fmt_num(stats.min_dscr),
            fmt_num(stats.max_leverage),
            fmt_num(stats.min_icr),
            fmt_num(dscr_cov),
            fmt_num(stats.min_dscr - dscr_cov),
        ),
        ReportSection::HistoricalPerformance => {
            if data.historical_data.is_empty() {
                writeln!(
                    p,
                    "Assess historical performance. No historical financials were provided: \
                     flag this as a critical gap and recommend obtaining three to five years."
                )
            } else {
                let recent: Vec<String> = data
                    .historical_data
                    .iter()
                    .rev()
                    .take(3)
                    .rev()
                    .map(|y| {
                        let year = match &y.year {
                            Some(Value::String(s)) => s.clone(),
                            Some(v) => v.to_string(),
                            None => "?".to_string(),
                        };
                        format!("{year}: {}", fmt_currency_mm(y.revenue().unwrap_or(0.0), ccy))
                    })
                    .collect();
                writeln!(
                    p,
                    "Assess historical performance over {} years.\n\
                     Revenue CAGR: {}. Recent revenue: {}.\n\
                     Cover earnings quality, one-off items, working capital and cash flow volatility, \
                     then rate performance Strong / Acceptable / Weak.",
                    data.historical_data.len(),
                    data.revenue_cagr()
                        .map(|c| format!("{}%", fmt_num(c)))
                        .unwrap_or_else(|| "N/A".to_string()),
                    recent.join(", "),
                )
            }
        }
        ReportSection::IndustryBenchmarking => writeln!(
            p,
            "Benchmark the borrower against typical {industry} peers.\n\
             Borrower leverage {}x and EBITDA margin {}.\n\
             Discuss cyclicality, growth outlook, competitive position and barriers to entry; \
             rate the borrower Above Average / Average / Below Average.",
            fmt_num(stats.max_leverage),
            fmt_pct(data.ebitda_margin()),
        ),
        ReportSection::CreditAnalysis => writeln!(
            p,
            "Provide the quantitative credit analysis.\n\
             - DSCR {}x against a {}x covenant (cushion {}x)\n\
             - Net debt / EBITDA {}x against a {}x limit\n\
             - Deleveraging over a {}-year projection\n\
             - LTV {} with lien position {}",
            fmt_num(stats.min_dscr),
            fmt_num(dscr_cov),
            fmt_num(stats.min_dscr - dscr_cov),
            fmt_num(stats.max_leverage),
            fmt_num(lev_cov),
            if data.base_rows().is_empty() { 5 } else { data.base_rows().len() },
            data.loan_to_value(1.0),
            data.param_text("lienPosition"),
        ),
        ReportSection::CollateralAnalysis => writeln!(
            p,
            "Analyse collateral for recovery.\nDescription: {}\n\
             - Market value {}; orderly liquidation {} ({:.0}%); forced sale {} ({:.0}%)\n\
             - LTV on market {}, on orderly liquidation {}, on forced sale {}\n\
             Estimate recovery and comment on enforceability.",
            data.param_text("collateralDescription"),
            fmt_currency_mm(data.collateral_value(), ccy),
            fmt_currency_mm(data.collateral_value() * ORDERLY_LIQUIDATION_HAIRCUT, ccy),
            ORDERLY_LIQUIDATION_HAIRCUT * 100.0,
            fmt_currency_mm(data.collateral_value() * FORCED_SALE_HAIRCUT, ccy),
            FORCED_SALE_HAIRCUT * 100.0,
            data.loan_to_value(1.0),
            data.loan_to_value(ORDERLY_LIQUIDATION_HAIRCUT),
            data.loan_to_value(FORCED_SALE_HAIRCUT),
        ),
        ReportSection::CovenantAnalysis => writeln!(
            p,
            "Analyse covenant headroom.\n\
             1. Minimum DSCR {}x: current {}x, headroom {}x; breached if EBITDA falls about {}.\n\
             2. Maximum net debt / EBITDA {}x: current {}x, headroom {}x.\n\
             3. Minimum interest cover {}x: current {}x, headroom {}x.\n\
             Recommend any covenant adjustments.",
            fmt_num(dscr_cov),
            fmt_num(stats.min_dscr),
            fmt_num(stats.min_dscr - dscr_cov),
            if stats.min_dscr > 0.0 {
                fmt_pct((stats.min_dscr - dscr_cov) / stats.min_dscr)
            } else {
                "N/A".to_string()
            },
            fmt_num(lev_cov),
            fmt_num(stats.max_leverage),
            fmt_num(lev_cov - stats.max_leverage),
            fmt_num(icr_target),
            fmt_num(stats.min_icr),
            fmt_num(stats.min_icr - icr_target),
        ),
        ReportSection::SensitivityAnalysis => writeln!(
            p,
            "Run a sensitivity discussion with decision triggers.\n\
             Revenue growth {}, EBITDA margin {}, current min DSCR {}x.\n\
             Estimate break-even revenue for a {}x DSCR and set an early-warning trigger at {}x.",
            fmt_pct(number(data.param("revenueGrowth")).unwrap_or(0.0)),
            fmt_pct(data.ebitda_margin()),
            fmt_num(stats.min_dscr),
            fmt_num(dscr_cov),
            fmt_num(dscr_cov + 0.10),
        ),
        ReportSection::RefinancingRisk => {
            let last = data.base_rows().last();
            writeln!(
                p,
                "Assess refinancing and exit risk.\n\
                 Projected debt at maturity {} with leverage {}x.\n\
                 Cover refinancing market conditions, balloon exposure and alternative exits.",
                fmt_currency_mm(number(last.and_then(|r| r.get("endingDebt"))).unwrap_or(0.0), ccy),
                fmt_num(number(last.and_then(|r| r.get("ndToEbitda"))).unwrap_or(0.0)),
            )
        }
        ReportSection::EsgAndRegulatory => writeln!(
            p,
            "Assess environmental, social, governance and regulatory risk for a {industry} borrower.\n\
             Key customers and suppliers: {}.\n\
             Cover licensing, compliance history and reputational exposure.",
            data.param_text("keyCustomers"),
        ),
        ReportSection::BusinessAnalysis => writeln!(
            p,
            "Assess business quality.\nBusiness model: {}\nManagement experience: {}\n\
             Cover market dynamics in {industry}, competitive advantages and key dependencies.",
            data.param_text("businessModel"),
            data.param_text("managementExperience"),
        ),
        ReportSection::Recommendation => writeln!(
            p,
            "Give the final credit recommendation.\n\
             DSCR {}x against a {}x covenant ({}), leverage {}x, ICR {}x.\n\
             State the decision, key conditions precedent and monitoring requirements.",
            fmt_num(stats.min_dscr),
            fmt_num(dscr_cov),
            if stats.min_dscr >= dscr_cov { "compliant" } else { "in breach" },
            fmt_num(stats.max_leverage),
            fmt_num(stats.min_icr),
        ),
        ReportSection::RiskAssessment => writeln!(
            p,
            "List the five most material credit risks in priority order for a {industry} borrower \
             with leverage {}x and DSCR {}x. For each give likelihood, impact and a mitigant.",
            fmt_num(stats.max_leverage),
            fmt_num(stats.min_dscr),
        ),
        ReportSection::ScenarioAnalysis => {
            let mut lines = Vec::new();
            if let Some(base) = data.scenario("base") {
                lines.push(scenario_line("Base case", base));
            }
            if let Some(Value::Object(all)) = &data.projections {
                lines.extend(
                    all.iter()
                        .filter(|(name, _)| name.as_str() != "base")
                        .map(|(name, scenario)| scenario_line(name, scenario)),
                );
            }
            writeln!(
                p,
                "Interpret the stress scenarios for the Credit Committee.\n{}\n\
                 Identify the scenario closest to a covenant breach and the resilience of debt service.",
                if lines.is_empty() {
                    "No scenarios were provided.".to_string()
                } else {
                    lines.join("\n")
                },
            )
        }
        ReportSection::SponsorAnalysis => {
            let equity = number(data.param("sponsorEquity")).unwrap_or(0.0);
            let capital = equity + data.loan_amount();
            writeln!(
                p,
                "Analyse the sponsor and alignment of interests.\n\
                 Equity invested {} ({}% of the capital structure).\n\
                 Cover sponsor track record, {industry} expertise and support capacity.",
                fmt_currency_mm(equity, ccy),
                fmt_num(if capital > 0.0 { equity / capital * 100.0 } else { 0.0 }),
            )
        }
    };

    if let Some(summary) = &data.model_summary {
        let summary = match summary {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let _ = writeln!(p, "\nModel summary:\n{summary}");
    }
    p.push_str(PLAIN_TEXT_FOOTER);
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ModelData {
        serde_json::from_value(json!({
            "ccy": "USD",
            "params": {
                "industry": "Logistics",
                "requestedLoanAmount": 8_000_000.0,
                "collateralValue": 10_000_000.0,
                "minDSCR": 1.25,
                "sponsorEquity": 2_000_000.0
            },
            "projections": {
                "base": {
                    "irr": 0.18,
                    "creditStats": { "minDSCR": 1.5, "maxLeverage": 2.75, "minICR": 3.0 },
                    "rows": [
                        { "revenue": 20_000_000.0, "ebitda": 5_000_000.0, "endingDebt": 8_000_000.0, "ndToEbitda": 1.6 },
                        { "revenue": 22_000_000.0, "ebitda": 5_500_000.0, "endingDebt": 6_000_000.0, "ndToEbitda": 1.1 }
                    ]
                },
                "downside": {
                    "irr": 0.09,
                    "creditStats": { "minDSCR": 1.1 },
                    "breaches": { "dscrBreaches": 2, "icrBreaches": 1 }
                }
            },
            "historicalData": [
                { "year": 2021, "revenue": 16_000_000.0 },
                { "year": 2022, "revenue": 18_000_000.0 },
                { "year": "2023", "revenue": 20_000_000.0 }
            ],
            "modelSummary": "Regional freight operator."
        }))
        .unwrap()
    }

    #[test]
    fn section_names_round_trip() {
        for section in ReportSection::ALL {
            assert_eq!(section.as_str().parse::<ReportSection>().unwrap(), section);
            let json = serde_json::to_value(section).unwrap();
            assert_eq!(json, section.as_str());
        }
        assert!("appendix".parse::<ReportSection>().is_err());
    }

    #[test]
    fn credit_stats_and_margin() {
        let data = sample();
        let stats = data.credit_stats();
        assert_eq!(stats.min_dscr, 1.5);
        assert_eq!(stats.max_leverage, 2.75);
        assert!((data.ebitda_margin() - 0.25).abs() < 1e-12);
        let cagr = data.revenue_cagr().unwrap();
        assert!((cagr - 11.803398874989483).abs() < 1e-6);
    }

    #[test]
    fn loosely_typed_fields_are_accepted() {
        let data: ModelData = serde_json::from_value(json!({
            "ccy": 123,
            "historicalData": [
                { "year": 2022, "revenue": "16,000,000", "ebitda": "n/a" },
                { "year": 2023, "revenue": "20000000" },
                { "year": 2024, "revenue": null }
            ]
        }))
        .unwrap();
        assert_eq!(data.historical_data[0].revenue(), Some(16_000_000.0));
        assert_eq!(data.historical_data[2].revenue(), None);
        assert!((data.revenue_cagr().unwrap() - 25.0).abs() < 1e-9);
        let prompt = build_prompt(ReportSection::HistoricalPerformance, &data);
        assert!(prompt.contains("USD 20M"));
    }

    #[test]
    fn empty_model_uses_defaults() {
        let data = ModelData::default();
        assert_eq!(data.credit_stats(), CreditStats::default());
        assert!(data.revenue_cagr().is_none());
        let prompt = build_prompt(ReportSection::CovenantAnalysis, &data);
        assert!(prompt.contains("Minimum DSCR 1.20x"));
        assert!(prompt.contains("N/A"));
    }

    #[test]
    fn executive_summary_quotes_metrics() {
        let prompt = build_prompt(ReportSection::ExecutiveSummary, &sample());
        assert!(prompt.contains("Logistics"));
        assert!(prompt.contains("USD 8M"));
        assert!(prompt.contains("DSCR 1.50x"));
        assert!(prompt.contains("leaves 0.25x cushion"));
        assert!(prompt.contains("Regional freight operator."));
        assert!(prompt.ends_with(PLAIN_TEXT_FOOTER));
    }

    #[test]
    fn collateral_applies_haircuts() {
        let prompt = build_prompt(ReportSection::CollateralAnalysis, &sample());
        assert!(prompt.contains("orderly liquidation USD 7M (70%)"));
        assert!(prompt.contains("forced sale USD 5M (50%)"));
        assert!(prompt.contains("LTV on market 80.00%"));
        assert!(prompt.contains("on forced sale 160.00%"));
    }

    #[test]
    fn historical_gap_is_flagged() {
        let prompt = build_prompt(ReportSection::HistoricalPerformance, &ModelData::default());
        assert!(prompt.contains("critical gap"));
        let prompt = build_prompt(ReportSection::HistoricalPerformance, &sample());
        assert!(prompt.contains("2021: USD 16M"));
        assert!(prompt.contains("2023: USD 20M"));
    }

    #[test]
    fn scenarios_list_non_base_cases() {
        let prompt = build_prompt(ReportSection::ScenarioAnalysis, &sample());
        assert!(prompt.contains("Base case: IRR 18.0%"));
        assert!(prompt.contains("downside: IRR 9.0%, min DSCR 1.10x, covenant breaches 3"));
    }

    #[test]
    fn every_section_produces_text() {
        let data = sample();
        for section in ReportSection::ALL {
            let prompt = build_prompt(section, &data);
            assert!(prompt.len() > PLAIN_TEXT_FOOTER.len(), "{section:?}");
        }
    }
}
