use axum::Router;

pub mod authors;
pub mod system;

pub fn router() -> Router {
    Router::new().nest("/authors", authors::router())
}
