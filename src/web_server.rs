use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::judge::JudgeServer;
use crate::routes;

/// Submissions carry full source text, so the default payload limit is too small
const PAYLOAD_LIMIT: usize = 16 * 1024 * 1024;

pub fn build_dispatcher(config: Config) -> Dispatcher {
    let Config { token, judger, .. } = config;
    Dispatcher::new(token, JudgeServer::with_local_collaborators(judger))
}

pub fn build_server(config: Config) -> std::io::Result<Server> {
    let server_config = config.server.clone();
    let dispatcher = web::Data::new(build_dispatcher(config));

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(dispatcher.clone())
            .app_data(web::PayloadConfig::new(PAYLOAD_LIMIT))
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    });
    if let Some(workers) = server_config.workers {
        server = server.workers(workers);
    }

    let server = server
        .bind((
            server_config
                .bind_address
                .unwrap_or("127.0.0.1".to_string()),
            server_config.bind_port.unwrap_or(12358),
        ))?
        .run();

    Ok(server)
}
