use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultItem {
    pub id: i64,
    pub created_at: String,
    pub answered_at: Option<String>,
    pub full_name: String,
    pub theme_name: String,
    pub result: String,
    pub user_answer: String,
}

#[derive(Debug, Deserialize)]
pub struct DataPage {
    pub data: Vec<ResultItem>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct AnalysisRequest<'a> {
    pub selected_answers: &'a [ResultItem],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
