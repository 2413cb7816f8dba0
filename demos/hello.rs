use pyspeed::{init_logging, JsonObject, JsonValue, ResponseData, Server};

fn main() {
    init_logging();

    let mut server = Server::bind("127.0.0.1:8080");
    server.workers(2);
    server.static_route("/static", "./static");
    server.route("/users/{id}", "get_user");
    server.app_handler(|req| match req.handler_id.as_deref() {
        Some("get_user") => {
            let mut user = JsonObject::new();
            user.insert("id", JsonValue::from(req.params["id"].as_str()));
            user.insert("active", JsonValue::Bool(true));
            ResponseData::json(pyspeed::json::dumps(&JsonValue::Object(user), false))
        }
        _ => ResponseData::error(404, "No such endpoint"),
    });

    if let Err(e) = server.serve() {
        eprintln!("server error: {}", e);
    }
}
