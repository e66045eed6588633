/*
┌─────────────────────────────────────────────────────────────────────────────┐
│                         GROWTH INTERACTIVE CLIENT                            │
└─────────────────────────────────────────────────────────────────────────────┘

  Plain text goes to the consultant dialogue. Commands:

    /register <email> <password> <name>     /login <email> <password>
    /logout
    /businesses   /new <name>   /open <business_id>   /delete
    /analyze      /redo         /score
    /dim <dimension> then /ask <question>
    /task <task_id>  then /expand, /taskask <question>, /assist,
                     /done [subtask_id], /undo [subtask_id]
    /quit

  Every action runs in its own growth-worker process.
*/

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use growth_orchestrator::cli::ClientArgs;
use growth_orchestrator::pipeline::{Analysis, Dimension};
use growth_orchestrator::runtime::{ProcessBoundary, WorkerCommand};
use growth_orchestrator::session::{AnalysisOutcome, SessionController};
use growth_sdk::{log_found, log_info, log_phase_complete_console, log_phase_start_console, log_warning, Action, Frame};

fn print_analysis(analysis: &Analysis) {
    println!(
        "\nScore geral: {}/100 ({})",
        analysis.score.overall,
        analysis.score.classification.label()
    );
    for d in &analysis.score.dimensions {
        println!("  {:<26} {:>3}  {:?}", d.dimension.label(), d.score, d.status);
    }
    log_found!(analysis.tasks.len(), "tarefas");
    for task in &analysis.tasks {
        println!("  {} [{:.2}] {} ({})", task.id, task.computed_priority, task.title, task.category.label());
    }
    match &analysis.execution_plan {
        Some(plan) => {
            println!("\nMeta: {} ({})", plan.goal, plan.horizon);
            for phase in &plan.phases {
                println!("  {} ({}): {}", phase.title, phase.weeks, phase.task_ids.join(", "));
            }
        }
        None => {
            log_warning!("sem plano de execução; use a lista de tarefas");
        }
    }
    if !analysis.degraded.is_empty() {
        log_warning!("análise parcial: {:?}", analysis.degraded);
    }
}

/// Print progress frames while an analysis runs
fn progress_printer() -> (mpsc::UnboundedSender<Frame>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let printer = tokio::spawn(async move {
        let mut current = 0u8;
        while let Some(frame) = rx.recv().await {
            if let Frame::Thought { message, phase } = frame {
                match phase {
                    Some(p) if p != current => {
                        if current > 0 {
                            log_phase_complete_console!(current);
                        }
                        current = p;
                        log_phase_start_console!(p, "Análise", message);
                    }
                    _ => {
                        log_info!(message);
                    }
                }
            }
        }
    });
    (tx, printer)
}

async fn run_analysis(controller: &mut SessionController, redo: bool) -> Result<()> {
    let (tx, printer) = progress_printer();
    let outcome = if redo {
        controller.redo_analysis(tx).await?
    } else {
        controller.analyze(tx).await?
    };
    let _ = printer.await;

    match outcome {
        AnalysisOutcome::Completed(analysis) => print_analysis(&analysis),
        AnalysisOutcome::Failed(e) => {
            log_warning!("a análise falhou ({}): {}", e.kind(), e);
            log_info!("use /redo para tentar de novo sem refazer a conversa");
        }
        AnalysisOutcome::Unknown { error, recovered } => {
            log_warning!("conexão com o worker perdida: {}", error);
            match recovered {
                Some(analysis) => {
                    log_info!("a análise foi salva antes da queda");
                    print_analysis(&analysis);
                }
                None => {
                    log_info!("nenhuma análise nova encontrada; tente /redo");
                }
            }
        }
    }
    Ok(())
}

async fn handle(controller: &mut SessionController, line: &str) -> Result<bool> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let args: Vec<&str> = rest.split_whitespace().collect();

    match command {
        "/quit" | "/exit" => return Ok(false),
        "/register" if args.len() >= 3 => {
            controller.register(args[0], args[1], &args[2..].join(" ")).await?;
            log_info!("conta criada");
        }
        "/login" if args.len() == 2 => {
            controller.login(args[0], args[1]).await?;
            log_info!("bem-vindo de volta");
        }
        "/logout" => controller.logout().await?,
        "/businesses" => {
            let businesses = controller.list_businesses().await?;
            log_found!(businesses.len(), "negócios");
            for b in businesses {
                println!("  {}  {} ({})", b.id, b.name, b.segment);
            }
        }
        "/new" if !rest.is_empty() => {
            let business = controller.create_business(rest).await?;
            log_info!("negócio criado: {}", business.id);
        }
        "/open" if !rest.is_empty() => match controller.select_business(rest).await? {
            Some(analysis) => print_analysis(&analysis),
            None => {
                log_info!("este negócio ainda não tem análise");
            }
        },
        "/delete" => controller.delete_selected_business().await?,
        "/analyze" => run_analysis(controller, false).await?,
        "/redo" => run_analysis(controller, true).await?,
        "/score" => match &controller.state().latest_analysis {
            Some(analysis) => print_analysis(analysis),
            None => {
                log_warning!("nenhuma análise ainda");
            }
        },
        "/dim" => match Dimension::from_category(rest) {
            Some(dimension) => {
                controller.select_dimension(dimension);
                if let Some(view) = controller.dimension_view() {
                    println!("{}: {}/100\n{}", dimension.label(), view.score.score, view.score.justification);
                }
            }
            None => {
                log_warning!("dimensão desconhecida: {}", rest);
            }
        },
        "/ask" if !rest.is_empty() => {
            let reply = controller.ask_about_dimension(rest).await?;
            println!("{}", reply.content);
        }
        "/task" if !rest.is_empty() => {
            controller.select_task(rest)?;
            if let Some(view) = controller.task_view() {
                println!("{}\n{}", view.task.title, view.task.description);
            }
        }
        "/expand" => {
            let detail = controller.expand_selected_task().await?;
            let done = controller
                .task_view()
                .and_then(|view| view.completion.cloned())
                .unwrap_or_default();
            for subtask in &detail.subtasks {
                let mark = if done.completed_subtasks.contains(&subtask.id) { "x" } else { " " };
                println!("  [{}] {}: {} ({})", mark, subtask.id, subtask.title, subtask.estimated_time);
            }
            if !detail.main_tip.is_empty() {
                log_info!("dica: {}", detail.main_tip);
            }
        }
        "/taskask" if !rest.is_empty() => {
            let reply = controller.ask_about_task(rest).await?;
            println!("{}", reply.content);
        }
        "/done" | "/undo" => {
            let subtask = (!rest.is_empty()).then_some(rest);
            let completion = controller.mark_selected_task(subtask, command == "/done").await?;
            log_info!(
                "tarefa {}; subtarefas concluídas: {}",
                if completion.completed { "concluída" } else { "em aberto" },
                completion.completed_subtasks.len()
            );
        }
        "/assist" => {
            let output = controller.assist_selected_task().await?;
            println!("{}", output.conteudo);
        }
        c if c.starts_with('/') => {
            log_warning!("comando inválido: {}", line);
        }
        _ => {
            let reply = controller.send_message(line).await?;
            println!("{}", reply);
            if controller.dialogue_view().ready_for_analysis {
                log_info!("perfil completo; use /analyze");
            }
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GROWTH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = ClientArgs::parse();
    args.validate()?;

    let command = match &args.worker {
        Some(path) => WorkerCommand::new(path),
        None => WorkerCommand::sibling_worker()?,
    };
    let mut boundary = ProcessBoundary::new(command);
    if let Some(secs) = args.analyze_timeout {
        boundary = boundary.with_timeout(Action::Analyze, Duration::from_secs(secs));
    }
    let mut controller = SessionController::new(Arc::new(boundary));

    // Empty first turn asks the worker for the greeting
    match controller.send_message("").await {
        Ok(greeting) => println!("{}", greeting),
        Err(e) => {
            log_warning!("{}", e);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match handle(&mut controller, line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                log_warning!("{:#}", e);
            }
        }
    }
    Ok(())
}
