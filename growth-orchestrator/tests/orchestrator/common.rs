//! Common test utilities for orchestrator tests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub use growth_orchestrator::config::PipelineSettings;
pub use growth_orchestrator::database::Database;
pub use growth_orchestrator::pipeline::{run_analysis, Analysis, AnalyzeRequest, Dimension};
pub use growth_orchestrator::providers::{
    Capabilities, CompletionProvider, CompletionRequest, SearchHit, SearchProvider,
};
pub use growth_sdk::Frame;

// Fragments of each capability's system prompt, used to route scripted answers
pub const EXTRACTION: &str = "Extraia do diálogo";
pub const CONDENSE: &str = "resume resultados de busca";
pub const PROFILER: &str = "organiza dados de onboarding";
pub const SCORER: &str = "quantitativo";
pub const PLANNER: &str = "plano de ação";
pub const MACRO_PLANNER: &str = "fases cronológicas";
pub const EXPANDER: &str = "Quebre tarefas";
pub const CHAT: &str = "respondendo dúvidas";
pub const ASSIST: &str = "material pronto";

// ============================================================================
// Scripted capabilities
// ============================================================================

/// Completion provider that answers by system prompt
///
/// Each route holds a queue; answers are popped until one is left, which then
/// repeats. A request no route matches fails.
#[derive(Default)]
pub struct ScriptedLlm {
    routes: Mutex<Vec<(&'static str, VecDeque<Value>)>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, needle: &'static str, answer: Value) -> Self {
        {
            let mut routes = self.routes.lock().unwrap();
            match routes.iter_mut().find(|(n, _)| *n == needle) {
                Some((_, queue)) => queue.push_back(answer),
                None => routes.push((needle, VecDeque::from([answer]))),
            }
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn calls_to(&self, needle: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.system.contains(needle))
            .count()
    }

    pub fn last_prompt_to(&self, needle: &str) -> Option<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.system.contains(needle))
            .map(|r| r.prompt.clone())
    }
}

#[async_trait]
impl CompletionProvider for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value> {
        self.requests.lock().unwrap().push(request.clone());
        let mut routes = self.routes.lock().unwrap();
        let (_, queue) = routes
            .iter_mut()
            .find(|(needle, _)| request.system.contains(needle))
            .ok_or_else(|| anyhow!("no scripted answer for this prompt"))?;
        let answer = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        answer.ok_or_else(|| anyhow!("scripted route is empty"))
    }
}

/// Search provider that fabricates `per_query` hits per query and counts calls
pub struct CountingSearch {
    per_query: usize,
    fail: bool,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl CountingSearch {
    pub fn new(per_query: usize) -> Self {
        Self {
            per_query,
            fail: false,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for CountingSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(anyhow!("search backend unavailable"));
        }
        Ok((0..self.per_query.min(max_results))
            .map(|i| SearchHit {
                title: format!("Resultado {} para {}", i + 1, query),
                url: format!("https://fontes.example.com/{}/{}", n, i),
                snippet: format!("Trecho sobre {}", query),
                score: 1.0 - i as f64 / 10.0,
            })
            .collect())
    }
}

pub fn caps(search: &Arc<CountingSearch>, llm: &Arc<ScriptedLlm>) -> Capabilities {
    Capabilities::new(search.clone(), llm.clone())
}

pub fn memory_db() -> Database {
    let db = Database::new_in_memory().unwrap();
    db.initialize_schema().unwrap();
    db
}

/// Frame sink whose receiver is kept so sends never fail
pub fn frame_channel() -> (
    tokio::sync::mpsc::UnboundedSender<Frame>,
    tokio::sync::mpsc::UnboundedReceiver<Frame>,
) {
    tokio::sync::mpsc::unbounded_channel()
}

pub fn drain_phases(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Frame>) -> Vec<u8> {
    let mut phases = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let Frame::Thought { phase: Some(p), .. } = frame {
            phases.push(p);
        }
    }
    phases
}

// ============================================================================
// Fixtures
// ============================================================================

/// Flat dialogue profile for a one-person bakery
pub fn padaria_profile() -> Value {
    json!({
        "nome_negocio": "Padaria Pão Quente",
        "segmento": "padaria artesanal",
        "modelo": "B2C",
        "localizacao": "Campinas, SP",
        "dificuldades": "poucos clientes novos durante a semana",
        "objetivos": "dobrar as vendas em 6 meses",
        "num_funcionarios": "1",
        "canais_venda": ["Instagram", "WhatsApp"],
        "capital_disponivel": "baixo"
    })
}

pub fn profiler_answer() -> Value {
    json!({
        "perfil": {
            "tipo_produto": "pães de fermentação natural",
            "ticket_medio": "R$ 35"
        }
    })
}

pub fn scorer_answer() -> Value {
    json!({
        "dimensoes": {
            "presenca_digital": { "score": 40, "justificativa": "Perfil pouco ativo", "acoes_imediatas": ["Postar 3x por semana"] },
            "competitividade": { "score": 55, "justificativa": "Produto diferenciado" },
            "diversificacao_canais": { "score": 30, "justificativa": "Depende de dois canais" },
            "precificacao": { "score": 65, "justificativa": "Preço alinhado" },
            "potencial_mercado": { "score": 75, "justificativa": "Demanda crescente" },
            "maturidade_operacional": { "score": "50", "justificativa": "Processos informais" }
        },
        "resumo_executivo": "Negócio promissor com pouca visibilidade."
    })
}

pub fn tasks_answer() -> Value {
    json!({
        "tasks": [
            {
                "id": "t1",
                "titulo": "Cadastrar a padaria no Google Meu Negócio",
                "categoria": "presenca_digital",
                "impacto": 8,
                "esforco": 2,
                "descricao": "Aparecer nas buscas do bairro",
                "passos": ["Criar conta", "Adicionar fotos"],
                "suporte_ia": { "tipo": "copywriting", "descricao": "Texto da ficha" }
            },
            {
                "id": "t2",
                "titulo": "Fechar parceria com cafés vizinhos",
                "categoria": "canais",
                "impacto": 7,
                "esforco": 4,
                "descricao": "Novo ponto de venda recorrente"
            },
            {
                "id": "t3",
                "titulo": "Revisar a tabela de preço dos pães especiais",
                "categoria": "precificacao",
                "impacto": 5,
                "esforco": 3,
                "descricao": "Garantir margem nos itens de fermentação longa"
            },
            {
                "id": "t4",
                "titulo": "Mapear padarias concorrentes da região",
                "categoria": "categoria_inventada",
                "impacto": 6,
                "esforco": 5,
                "descricao": "Entender quem disputa o mesmo cliente",
                "suporte_ia": { "tipo": "analise_concorrente", "descricao": "Tabela comparativa" }
            }
        ]
    })
}

pub fn plan_answer() -> Value {
    json!({
        "meta": "Dobrar o faturamento em 6 meses",
        "horizonte": "8 semanas",
        "resumo_estrategia": "Visibilidade primeiro, canais depois",
        "fases": [
            { "titulo": "Base", "semanas": "1-2", "tarefas": ["task_001", "task_002"] },
            { "titulo": "Expansão", "semanas": "3-8", "tarefas": ["task_003", "task_004"] }
        ]
    })
}

/// Completion provider scripted for a full successful analysis
pub fn pipeline_llm() -> ScriptedLlm {
    ScriptedLlm::new()
        .on(PROFILER, profiler_answer())
        .on(SCORER, scorer_answer())
        .on(PLANNER, tasks_answer())
        .on(MACRO_PLANNER, plan_answer())
}

pub fn expansion_answer() -> Value {
    json!({
        "subtarefas": [
            { "titulo": "Criar a conta", "descricao": "Use o e-mail da padaria", "tempo_estimado": "15 min", "ferramenta": "Google" },
            { "titulo": "Subir fotos", "descricao": "Fachada e vitrine", "tempo_estimado": "20 min" }
        ],
        "ferramentas_necessarias": [
            { "nome": "Google Business Profile", "url": "https://business.google.com", "custo": "gratuito", "para_que": "ficha local" }
        ],
        "tempo_total_estimado": "35 min",
        "resultado_esperado": "Ficha verificada",
        "dica_principal": "Peça avaliações aos clientes fiéis"
    })
}

pub async fn analyze_padaria(search: &Arc<CountingSearch>, llm: &Arc<ScriptedLlm>) -> Analysis {
    let (tx, _rx) = frame_channel();
    let request = AnalyzeRequest {
        profile: padaria_profile(),
        formal: None,
        business_id: None,
    };
    run_analysis(&request, &caps(search, llm), &PipelineSettings::default(), &tx)
        .await
        .unwrap()
}

/// Store `analysis` under a fresh owner and business; returns the business id
pub fn save_under_business(db: &Database, analysis: &Analysis) -> String {
    let user = growth_orchestrator::database::UserRecord {
        id: uuid::Uuid::new_v4().to_string(),
        email: format!("{}@padaria.com", uuid::Uuid::new_v4()),
        name: "Ana".to_string(),
        created_at: chrono::Utc::now(),
    };
    db.insert_user(&user, "salt", "hash").unwrap();
    let business = db
        .create_business(&user.id, "Padaria Pão Quente", &padaria_profile())
        .unwrap();
    db.save_analysis(&business.id, analysis).unwrap();
    business.id
}

// ============================================================================
// Worker scripts
// ============================================================================

/// Write a `sh` worker script into `dir`
///
/// The script is run as `sh <script> --action <a> --input-file <path>`, so
/// `$2` is the action and `$4` the envelope path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}
