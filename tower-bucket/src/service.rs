use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use bytes::Bytes;
use tower::BoxError;
use tower::Service;

use crate::ApiRequest;
use crate::ApiResponse;
use crate::Rest;
use crate::RestError;

/// `Rest` as a tower service, so it can sit under other tower middleware.
///
/// The scheduler queues internally, so the service is always ready.
impl<T> Service<ApiRequest> for Rest<T>
where
    T: Service<http::Request<Bytes>, Response = http::Response<Bytes>, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    T::Future: Send,
{
    type Response = ApiResponse;
    type Error = RestError;
    type Future = Pin<Box<dyn Future<Output = Result<ApiResponse, RestError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: ApiRequest) -> Self::Future {
        let rest = self.clone();
        Box::pin(async move { rest.execute(request).await })
    }
}
