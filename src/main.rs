use bpm_domain::{ExecutionEntity, ProcessDefinitionEntity, ProcessDefinitionGraph, ScopeRef};
use bpm_flow::{ProcessEngine, ProcessInstanceQuery};
use std::error::Error;
use std::io::{self, Write};

/// Menú interactivo sobre el motor de procesos.
///
/// El backend sale del entorno (`BPM_PERSISTENCE`, `DATABASE_URL`,
/// `BPM_SCHEMA_UPDATE`); por defecto usa la rejilla de mapas en memoria.
/// Al arrancar publica la definición de ejemplo `order:1`.
///
/// Opciones soportadas:
/// 1) Iniciar instancia
/// 2) Listar instancias
/// 3) Ver ejecuciones de una instancia
/// 4) Crear ejecución concurrente
/// 5) Eliminar instancia
/// 6) Salir
fn main() -> Result<(), Box<dyn Error>> {
    let engine = bpm_persistence::configuration_from_env()?.build_process_engine()?;
    engine.register_definition(ProcessDefinitionEntity::new("order:1", "order", 1), demo_graph()?)?;
    println!("Motor '{}' con persistencia {}", engine.name(), engine.persistence_backend());

    loop {
        println!("\n== BPM CLI menu ==");
        println!("1) Iniciar instancia de 'order'");
        println!("2) Listar instancias");
        println!("3) Ver ejecuciones de una instancia");
        println!("4) Crear ejecución concurrente");
        println!("5) Eliminar instancia");
        println!("6) Salir");
        print!("Elige una opción: ");
        io::stdout().flush().ok();

        let mut choice = String::new();
        io::stdin().read_line(&mut choice)?;
        match choice.trim() {
            "1" => {
                let activity = prompt("Actividad inicial (A0, A1, A2, Review): ")?;
                let business_key = prompt("Business key (enter para vacío): ")?;
                let business_key = Some(business_key.trim().to_string()).filter(|s| !s.is_empty());
                match engine.runtime_service()
                            .start_process_instance_by_key("order", activity.trim(), business_key)
                {
                    Ok(root) => println!("Instancia creada: {}", root.id),
                    Err(e) => eprintln!("Error iniciando instancia: {}", e),
                }
            }
            "2" => match engine.runtime_service().process_instances(ProcessInstanceQuery::default()) {
                Ok(instances) => {
                    println!("\nID                                   | DEFINICIÓN | BUSINESS KEY");
                    println!("-----------------------------------------------------------------");
                    for p in instances {
                        println!("{} | {} | {}",
                                 p.id,
                                 p.process_definition_id.as_deref().unwrap_or("-"),
                                 p.business_key.as_deref().unwrap_or("-"));
                    }
                }
                Err(e) => eprintln!("Error listando instancias: {}", e),
            },
            "3" => {
                let id = prompt("Id de la instancia: ")?;
                match engine.runtime_service().executions_of(id.trim()) {
                    Ok(executions) => print_tree(&executions),
                    Err(e) => eprintln!("Error leyendo ejecuciones: {}", e),
                }
            }
            "4" => {
                let id = prompt("Id de la ejecución: ")?;
                let activity = prompt("Actividad de la nueva ejecución: ")?;
                match engine.runtime_service()
                            .create_concurrent_execution(id.trim(), activity.trim())
                {
                    Ok(created) => println!("Ejecución concurrente creada: {}", created),
                    Err(e) => eprintln!("Error creando ejecución: {}", e),
                }
            }
            "5" => {
                let id = prompt("Id de la instancia a eliminar: ")?;
                let confirm = prompt(&format!("Confirma borrado de {}? escribir 'yes' para confirmar: ", id.trim()))?;
                if confirm.trim().to_lowercase() == "yes" {
                    match engine.runtime_service().delete_process_instance(id.trim()) {
                        Ok(n) => println!("Instancia eliminada ({} ejecuciones)", n),
                        Err(e) => eprintln!("Error eliminando instancia: {}", e),
                    }
                } else {
                    println!("Borrado cancelado");
                }
            }
            "6" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    close(engine)
}

/// Proceso de ejemplo: tres tareas planas y un subproceso `Review` con un
/// temporizador de borde.
fn demo_graph() -> Result<ProcessDefinitionGraph, Box<dyn Error>> {
    let mut graph = ProcessDefinitionGraph::new("order");
    graph.add_activity(ScopeRef::Process, "A0", false)?;
    graph.add_activity(ScopeRef::Process, "A1", false)?;
    graph.add_activity(ScopeRef::Process, "A2", false)?;
    let review = graph.add_activity(ScopeRef::Process, "Review", true)?;
    graph.add_activity(ScopeRef::Activity(review), "Check", false)?;
    graph.attach_boundary_event(review, "ReviewTimeout")?;
    Ok(graph)
}

fn print_tree(executions: &[ExecutionEntity]) {
    println!("\nID                                   | PARENT                               | ACTIVIDAD | FLAGS");
    println!("--------------------------------------------------------------------------------------------------");
    for e in executions {
        let flags = [(e.is_active, "active"), (e.is_concurrent, "concurrent"), (e.is_scope, "scope")]
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(",");
        println!("{} | {} | {} | {}",
                 e.id,
                 e.parent_id.as_deref().unwrap_or("-"),
                 e.activity_id.as_deref().unwrap_or("-"),
                 flags);
    }
}

fn close(engine: ProcessEngine) -> Result<(), Box<dyn Error>> {
    engine.close()?;
    Ok(())
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}
