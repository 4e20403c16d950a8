use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fleet_telemetry::config::{EnvironmentConfig, StorageConfig};
use fleet_telemetry::database::connect_registry;
use fleet_telemetry::repositories::{InMemoryVehicleRegistry, PgVehicleRegistry, VehicleRegistry};
use fleet_telemetry::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Cargar variables de entorno
    dotenv().ok();

    let config = EnvironmentConfig::from_env()?;
    let storage = StorageConfig::from_env()?;

    // Configurar logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚚 Fleet Telemetry - motor de ingesta y agregación");
    info!("================================================");
    info!(
        "⚙️ Chunks de {} min, retención {}, política de recálculo {:?}",
        storage.reading_chunk_width.num_minutes(),
        storage
            .retention
            .map(|r| format!("{} días", r.num_days()))
            .unwrap_or_else(|| "desactivada".to_string()),
        storage.recompute_policy
    );
    if config.is_development() {
        info!(
            "🛠️ Modo desarrollo - CORS: {}",
            if config.cors_origins.is_empty() {
                "permisivo".to_string()
            } else {
                config.cors_origins.join(", ")
            }
        );
    }

    // Registro de vehículos: PostgreSQL si hay DATABASE_URL, memoria si no
    let registry: Arc<dyn VehicleRegistry> = match config.database_url.as_deref() {
        Some(url) => match connect_registry(url).await {
            Ok(pool) => Arc::new(PgVehicleRegistry::new(pool)),
            Err(e) => {
                error!("❌ Error conectando a la base de datos: {:#}", e);
                return Err(e);
            }
        },
        None => {
            info!("🧠 DATABASE_URL no configurada: registro de vehículos en memoria");
            Arc::new(InMemoryVehicleRegistry::new())
        }
    };

    let addr: SocketAddr = config.server_url().parse()?;
    let state = AppState::new(config, storage, registry)?;
    let scheduler = state.start_scheduler();
    let app = create_router(state.clone());

    info!("🌐 Servidor iniciando en http://{}", addr);
    info!("🔍 Endpoints disponibles:");
    info!("   GET  /health - Liveness");
    info!("   GET  /metrics - Métricas Prometheus");
    info!("📥 Ingesta:");
    info!("   POST /api/telemetry/ingest - Ingesta universal (4 formatos)");
    info!("   GET  /api/telemetry/ingest/stats - Estadísticas de ingesta");
    info!("   GET  /api/telemetry/ingest/health - Salud de la ingesta");
    info!("   GET  /api/telemetry/batches[/:batch_id] - Ledger de lotes");
    info!("🚗 Vehículos:");
    info!("   POST/GET /api/vehicles - Registrar / listar");
    info!("   GET/PUT/DELETE /api/vehicles/:id - Obtener / actualizar / desactivar");
    info!("   GET  /api/vehicles/:id/readings[/idle] - Lecturas paginadas");
    info!("   GET  /api/vehicles/:id/anomalies - Anomalías paginadas");
    info!("   GET  /api/vehicles/:id/kpis - KPIs horarios");
    info!("   POST /api/vehicles/:id/kpis/compute|recompute - Agregación horaria");
    info!("   GET  /api/vehicles/:id/stats - Estadísticas del periodo");
    info!("🚨 Anomalías:");
    info!("   POST /api/anomalies - Registrar evento");
    info!("   GET  /api/anomalies - Feed de alertas de la flota");
    info!("   POST /api/anomalies/:id/processed - Marcar procesado");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Apagado ordenado: parar tareas y cerrar el almacén a nuevas escrituras
    scheduler.stop().await;
    state.readings.close();

    if let Err(e) = served {
        error!("❌ Servidor terminó con error: {}", e);
        return Err(e.into());
    }

    info!("👋 Servidor terminado");
    Ok(())
}

/// Señal de apagado graceful
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("❌ No se pudo instalar el handler de Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("❌ No se pudo instalar el handler de SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("🛑 Señal Ctrl+C recibida, apagando servidor...");
        },
        _ = terminate => {
            info!("🛑 Señal de terminación recibida, apagando servidor...");
        },
    }
}
