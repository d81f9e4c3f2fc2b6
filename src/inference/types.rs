//! Tipos de dados para requisições e respostas da API de inferência.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` para conversão JSON
//! conforme o formato esperado pelo endpoint `v1/messages`.

use serde::{Deserialize, Serialize};

/// Corpo da requisição para o endpoint `/v1/messages`.
///
/// Contém o modelo desejado, o limite de tokens, os parâmetros de
/// amostragem e a lista de mensagens que compõem a conversa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Identificador do modelo a ser usado (ex.: "claude-sonnet-4-5-20250929").
    pub model: String,
    /// Número máximo de tokens na resposta gerada pelo modelo.
    pub max_tokens: u32,
    /// Temperatura de amostragem (0.0–1.0).
    pub temperature: f32,
    /// Núcleo de amostragem (top-p).
    pub top_p: f32,
    /// Lista de mensagens compondo a conversa (usuário e assistente).
    pub messages: Vec<Message>,
}

/// Uma única mensagem em uma conversa com o modelo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Papel do remetente: "user" ou "assistant".
    pub role: String,
    /// Conteúdo textual da mensagem.
    pub content: String,
}

/// Resposta retornada pelo endpoint `/v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    /// Identificador único da resposta (gerado pela API).
    pub id: String,
    /// Blocos de conteúdo na resposta (normalmente texto).
    pub content: Vec<ContentBlock>,
    /// Modelo que gerou a resposta.
    pub model: String,
    /// Motivo da parada da geração (ex.: "end_turn", "max_tokens").
    pub stop_reason: Option<String>,
    /// Estatísticas de uso de tokens (entrada e saída).
    pub usage: Usage,
}

/// Um bloco de conteúdo dentro da resposta — atualmente apenas texto.
///
/// O campo `content_type` é serializado como `"type"` no JSON via
/// `serde(rename)`, seguindo o formato da API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Tipo do bloco ("text"). Serializado como "type" no JSON.
    #[serde(rename = "type")]
    pub content_type: String,
    /// Conteúdo textual deste bloco.
    pub text: String,
}

/// Estatísticas de consumo de tokens para uma chamada à API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Número de tokens consumidos na entrada (prompt).
    pub input_tokens: u32,
    /// Número de tokens gerados na saída (resposta).
    pub output_tokens: u32,
}
