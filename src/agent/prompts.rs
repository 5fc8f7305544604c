//! Natural-language instructions sent to the agent.

use std::fmt::Write as _;

use serde_json::Value;

use crate::research::ResearchRequest;

/// Who the request is made on behalf of.
pub const CLIENT_NAME: &str = "Air8";

/// System role for supplier and product search requests.
pub const SEARCH_ROLE: &str = "You are a sourcing assistant. Use the supplier_search and \
product_search functions to find matching records and reply with their ids only.";

fn on_behalf() -> String {
    format!("I am sending this request on the behalf of {}.\n", CLIENT_NAME)
}

/// Inputs for a KYC extraction request.
#[derive(Debug, Clone)]
pub struct KycRequest<'a> {
    pub order_id: &'a str,
    pub file_url: &'a str,
    pub file_type: &'a str,
    pub nationality: &'a str,
    /// Candidates when one file holds several documents.
    pub possible_doc_types: Option<&'a [String]>,
    pub target_doc_type: Option<&'a str>,
    pub multiple_doc_types: bool,
}

pub fn kyc_extraction(req: &KycRequest<'_>) -> String {
    let statement = if req.multiple_doc_types {
        "This document contains multiple document types."
    } else {
        "This document contains only one document type."
    };
    let mut out = on_behalf();
    out.push_str("Could you perform Know Your Customer (KYC) verification?\n");
    let _ = writeln!(out, "The order id is {}", req.order_id);
    let _ = writeln!(out, "The image path is {}", req.file_url);
    let _ = writeln!(out, "The file type is {}", req.file_type);
    let _ = writeln!(out, "The nationality of the applicant is from {}", req.nationality);
    let _ = writeln!(
        out,
        "The possible document types are {}",
        req.possible_doc_types.map(list).unwrap_or_else(|| "None".into())
    );
    let _ = writeln!(
        out,
        "The target document type is {}",
        req.target_doc_type.unwrap_or("None")
    );
    out.push_str(statement);
    out.push('\n');
    out
}

/// Company background and news report.
pub fn company_research(req: &ResearchRequest) -> String {
    let mut out = format!("I am sending this request on behalf of {}.\n", CLIENT_NAME);
    out.push_str("Could you search for information and news about a company? Here are the details:\n");
    let _ = writeln!(out, "- Target company: {}", req.company.trim());
    let _ = writeln!(out, "- Research languages: {}", req.research_languages.join(", "));
    let _ = writeln!(out, "- Report language: {}", req.report_language);
    let _ = writeln!(out, "- Preferred news source: {}", req.news_source);
    let _ = writeln!(out, "- Region: {}", req.region);
    let _ = writeln!(
        out,
        "- Additional research focus: {}",
        req.additional_focus().unwrap_or("None")
    );
    let _ = writeln!(out, "- Number of results per focus area: {}", req.results_per_focus);
    let _ = writeln!(out, "- Number of news results: {}", req.news_results);
    let _ = writeln!(out, "- Search news only: {}", python_bool(req.news_only));
    let _ = writeln!(out, "- Search adverse news: {}", python_bool(req.adverse_news));
    out
}

fn python_bool(b: bool) -> &'static str {
    if b { "True" } else { "False" }
}

/// Field validation of an order's documents against a rule set.
pub fn content_check(order_id: &str, rules: &Value, doc_types: &[String]) -> String {
    let mut out = on_behalf();
    out.push_str(
        "Could you perform field validation on documents submitted under a unique order ID, \
         ensuring compliance with the given rule set?\n",
    );
    let _ = writeln!(out, "The order ID is {}", order_id);
    let _ = writeln!(out, "The rule set is {}", rules);
    let _ = writeln!(
        out,
        "The document types that need to be checked are {}",
        list(doc_types)
    );
    out
}

/// Validation of one uploaded document.
pub fn document_validation(doc_type: &str, order_id: &str, image_path: &str) -> String {
    format!(
        "I would like to submit a document.\n\
         Please validate the document.\n\
         doc_type is {}.\n\
         order is {},\n\
         image_path is {}.",
        doc_type, order_id, image_path
    )
}

pub fn supplier_search(search_id: &str, query: &str) -> String {
    format!(
        "I would like to perform a supplier search with the following details:\n\n\
         - search id: {}\n\
         - query: {}\n\n\
         Please execute the supplier_search function using these parameters.\n",
        search_id, query
    )
}

pub fn product_search(search_id: &str, query: Option<&str>, image_path: Option<&str>) -> String {
    format!(
        "I would like to perform a product search with the following details:\n\n\
         - search id: {}\n\
         - query: {}\n\
         - image path: {}\n\n\
         Please execute the product_search function using these parameters.\n",
        search_id,
        query.unwrap_or("None"),
        image_path.unwrap_or("None")
    )
}

fn list(items: &[String]) -> String {
    format!("[{}]", items.join(", "))
}
