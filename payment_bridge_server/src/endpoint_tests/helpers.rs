use actix_web::{
    body::MessageBody,
    dev::ServiceResponse,
    http::StatusCode,
    test,
    test::TestRequest,
    web::ServiceConfig,
    App,
};

pub async fn get_request(path: &str, configure: fn(&mut ServiceConfig)) -> (StatusCode, String) {
    let req = TestRequest::get().uri(path).to_request();
    let service = test::init_service(App::new().configure(configure)).await;
    let res = test::call_service(&service, req).await;
    into_parts(res)
}

pub async fn post_json(
    path: &str,
    body: serde_json::Value,
    configure: fn(&mut ServiceConfig),
) -> (StatusCode, String) {
    let req = TestRequest::post().uri(path).set_json(body).to_request();
    let service = test::init_service(App::new().configure(configure)).await;
    let res = test::call_service(&service, req).await;
    into_parts(res)
}

pub async fn post_raw(
    path: &str,
    body: Vec<u8>,
    content_type: &str,
    configure: fn(&mut ServiceConfig),
) -> (StatusCode, String) {
    let req = TestRequest::post()
        .uri(path)
        .insert_header(("content-type", content_type.to_string()))
        .set_payload(body)
        .to_request();
    let service = test::init_service(App::new().configure(configure)).await;
    let res = test::call_service(&service, req).await;
    into_parts(res)
}

fn into_parts<B: MessageBody>(res: ServiceResponse<B>) -> (StatusCode, String) {
    let status = res.status();
    let body = String::from_utf8_lossy(&res.into_body().try_into_bytes().ok().expect("non-streaming test body"))
        .into_owned();
    (status, body)
}
